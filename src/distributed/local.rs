//! In-process cluster of ranks connected through shared memory.

use super::transport::Transport;
use crate::error::MetaflowError;
use crate::runner::DistributedConfig;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default time a rank waits at a collective before declaring failure.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// State of the collective rendezvous.
///
/// A round has two phases. During deposit every rank writes its slot; the
/// last depositor publishes the result. During collect every rank takes a
/// copy; the last collector clears the result and opens the next round.
struct Rendezvous {
    slots: Vec<Option<Vec<u8>>>,
    deposited: usize,
    result: Option<Arc<Vec<Vec<u8>>>>,
    collected: usize,
    round: u64,
    failure: Option<String>,
    mailboxes: Vec<Vec<VecDeque<Vec<u8>>>>,
}

struct Shared {
    size: usize,
    state: Mutex<Rendezvous>,
    signal: Condvar,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, Rendezvous>, MetaflowError> {
        self.state
            .lock()
            .map_err(|_| MetaflowError::comm("cluster state poisoned"))
    }

    fn fail(&self, state: &mut Rendezvous, reason: String) -> MetaflowError {
        if state.failure.is_none() {
            log::warn!("local cluster failure: {reason}");
            state.failure = Some(reason.clone());
        }
        self.signal.notify_all();
        MetaflowError::comm(state.failure.clone().unwrap_or(reason))
    }

    /// Waits on the condition variable until `ready` holds.
    ///
    /// `ready` is checked before the failure flag, so a rank whose round
    /// already completed can still finish it after a peer failed.
    fn wait_until<'a>(
        &self,
        mut state: MutexGuard<'a, Rendezvous>,
        deadline: Instant,
        what: &str,
        ready: impl Fn(&Rendezvous) -> bool,
    ) -> Result<MutexGuard<'a, Rendezvous>, MetaflowError> {
        loop {
            if ready(&state) {
                return Ok(state);
            }
            if let Some(reason) = &state.failure {
                return Err(MetaflowError::comm(reason.clone()));
            }
            let now = Instant::now();
            if now >= deadline {
                let reason = format!("timed out waiting for {what}");
                return Err(self.fail(&mut state, reason));
            }
            state = self
                .signal
                .wait_timeout(state, deadline - now)
                .map_err(|_| MetaflowError::comm("cluster state poisoned"))?
                .0;
        }
    }
}

/// Factory for in-process transports.
///
/// # Examples
///
/// ```
/// use u_metaflow::distributed::{LocalCluster, Transport};
///
/// let transports = LocalCluster::new(3).into_transports();
/// let gathered: Vec<Vec<Vec<u8>>> = std::thread::scope(|s| {
///     let handles: Vec<_> = transports
///         .into_iter()
///         .map(|mut t| s.spawn(move || t.all_gather(vec![t.rank() as u8]).unwrap()))
///         .collect();
///     handles.into_iter().map(|h| h.join().unwrap()).collect()
/// });
/// assert!(gathered.iter().all(|g| g == &vec![vec![0], vec![1], vec![2]]));
/// ```
pub struct LocalCluster {
    size: usize,
    timeout: Duration,
}

impl LocalCluster {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// A cluster of `size` ranks using the timeout of `config`.
    pub fn from_config(size: usize, config: &DistributedConfig) -> Self {
        Self::new(size).with_timeout(config.comm_timeout())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Creates one connected transport per rank, ordered by rank.
    pub fn into_transports(self) -> Vec<LocalTransport> {
        let shared = Arc::new(Shared {
            size: self.size,
            state: Mutex::new(Rendezvous {
                slots: vec![None; self.size],
                deposited: 0,
                result: None,
                collected: 0,
                round: 0,
                failure: None,
                mailboxes: vec![vec![VecDeque::new(); self.size]; self.size],
            }),
            signal: Condvar::new(),
        });
        (0..self.size)
            .map(|rank| LocalTransport {
                rank,
                timeout: self.timeout,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

/// One rank's handle into a [`LocalCluster`].
///
/// Dropping a handle marks the cluster as failed for any collective that
/// has not yet completed, so peers never block on a departed rank.
pub struct LocalTransport {
    rank: usize,
    timeout: Duration,
    shared: Arc<Shared>,
}

impl LocalTransport {
    fn check_peer(&self, peer: usize) -> Result<(), MetaflowError> {
        if peer >= self.shared.size {
            return Err(MetaflowError::comm(format!(
                "rank {peer} out of range for {} ranks",
                self.shared.size
            )));
        }
        Ok(())
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn send(&mut self, to: usize, bytes: Vec<u8>) -> Result<(), MetaflowError> {
        self.check_peer(to)?;
        let mut state = self.shared.lock()?;
        if let Some(reason) = &state.failure {
            return Err(MetaflowError::comm(reason.clone()));
        }
        state.mailboxes[to][self.rank].push_back(bytes);
        self.shared.signal.notify_all();
        Ok(())
    }

    fn recv(&mut self, from: usize) -> Result<Vec<u8>, MetaflowError> {
        self.check_peer(from)?;
        let deadline = Instant::now() + self.timeout;
        let (me, shared) = (self.rank, &self.shared);
        let state = shared.lock()?;
        let mut state = shared.wait_until(state, deadline, "message", |s| {
            !s.mailboxes[me][from].is_empty()
        })?;
        state.mailboxes[me][from]
            .pop_front()
            .ok_or_else(|| MetaflowError::comm("mailbox drained concurrently"))
    }

    fn all_gather(&mut self, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>, MetaflowError> {
        let size = self.shared.size;
        let deadline = Instant::now() + self.timeout;
        let shared = &self.shared;

        // deposit phase: wait until the previous round has been collected
        let state = shared.lock()?;
        let mut state = shared.wait_until(state, deadline, "previous collective", |s| {
            s.result.is_none()
        })?;
        let round = state.round;
        state.slots[self.rank] = Some(bytes);
        state.deposited += 1;
        if state.deposited == size {
            let gathered: Vec<Vec<u8>> = state
                .slots
                .iter_mut()
                .map(|slot| slot.take().unwrap_or_default())
                .collect();
            state.result = Some(Arc::new(gathered));
            state.deposited = 0;
            shared.signal.notify_all();
        }

        // collect phase
        let mut state = shared.wait_until(state, deadline, "all_gather", |s| {
            s.round == round && s.result.is_some()
        })?;
        let gathered = state
            .result
            .as_ref()
            .map(|r| r.as_ref().clone())
            .unwrap_or_default();
        state.collected += 1;
        if state.collected == size {
            state.result = None;
            state.collected = 0;
            state.round += 1;
            shared.signal.notify_all();
        }
        Ok(gathered)
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            if state.failure.is_none() {
                state.failure = Some(format!("rank {} left the cluster", self.rank));
            }
            self.shared.signal.notify_all();
        }
    }
}
