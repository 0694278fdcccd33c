//! Flow-graph execution engine.
//!
//! An optimizer is described as a [`Program`]: a setup [`Flow`] run once
//! and a generation [`Flow`] traversed once per generation. Flows nest
//! control steps (repeat, until-no-improve, with-probability, every-k) over
//! strategy leaves and refer to containers by name.
//!
//! [`Runtime::compile`] turns a program into a [`FlowGraph`] arena plus a
//! [`RuntimeStorage`] of named containers, rejecting every configuration
//! problem up front. The [`Runtime`] then interprets the arena in pre-order.

mod compiler;
mod dsl;
mod graph;
mod runtime;
mod storage;

pub use dsl::{Flow, Program, Step};
pub use graph::{FlowGraph, Node, NodeId, NodeKind};
pub use runtime::{ReferenceLevel, Runtime, RuntimeOptions};
pub use storage::{ContainerId, ContainerRole, PsoMemoryIds, References, RuntimeStorage};
