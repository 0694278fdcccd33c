//! Collective exchanges built on [`Transport::all_gather`].

use super::payload::Payload;
use super::transport::Transport;
use crate::container::Candidate;
use crate::error::MetaflowError;

/// Exchanges every rank's best and returns the cluster minimum.
///
/// Ties go to the lowest rank. Returns `None` when no rank offered an
/// evaluated candidate. Every rank receives the same answer.
pub fn propagate_best(
    transport: &mut dyn Transport,
    best: Option<&Candidate>,
) -> Result<Option<(usize, Candidate)>, MetaflowError> {
    let payload = Payload::new(transport.rank(), best).encode()?;
    let gathered = transport.all_gather(payload)?;

    let mut winner: Option<Payload> = None;
    for bytes in &gathered {
        let incoming = Payload::decode(bytes)?;
        if incoming.fitness.is_none() {
            continue;
        }
        let better = winner
            .as_ref()
            .is_none_or(|w| incoming.fitness_or_worst() < w.fitness_or_worst());
        if better {
            winner = Some(incoming);
        }
    }

    if let Some(w) = &winner {
        log::info!(
            "rank {}: propagation selected rank {} (fitness {:.6e})",
            transport.rank(),
            w.rank,
            w.fitness_or_worst()
        );
    }
    Ok(winner.map(|w| (w.rank, w.into_candidate())))
}

/// Returns `true` on every rank if any rank votes to stop.
pub fn vote_stop(transport: &mut dyn Transport, stop: bool) -> Result<bool, MetaflowError> {
    if transport.size() == 1 {
        return Ok(stop);
    }
    let votes = transport.all_gather(vec![u8::from(stop)])?;
    Ok(votes.iter().any(|v| v.first() == Some(&1)))
}

/// Distributes the block mask of `root` to every rank.
///
/// Received masks are checked against `dim`: indices must be strictly
/// increasing and in range.
pub fn broadcast_mask(
    transport: &mut dyn Transport,
    root: usize,
    mask: &[usize],
    dim: usize,
) -> Result<Vec<usize>, MetaflowError> {
    let bytes = serde_json::to_vec(mask).map_err(MetaflowError::comm)?;
    let received = transport.broadcast(root, bytes)?;
    let mask: Vec<usize> = serde_json::from_slice(&received).map_err(MetaflowError::comm)?;
    let ordered = mask.windows(2).all(|w| w[0] < w[1]);
    if mask.is_empty() || !ordered || mask.last().is_some_and(|&i| i >= dim) {
        return Err(MetaflowError::comm(format!(
            "rank {}: malformed block mask from rank {root}",
            transport.rank()
        )));
    }
    Ok(mask)
}

/// Picks the minimum of local candidates; ties go to the lowest index.
pub fn best_of<'a>(candidates: impl IntoIterator<Item = &'a Candidate>) -> Option<(usize, &'a Candidate)> {
    let mut best: Option<(usize, &Candidate)> = None;
    for (i, c) in candidates.into_iter().enumerate() {
        if best.is_none_or(|(_, b)| c.fitness() < b.fitness()) {
            best = Some((i, c));
        }
    }
    best
}
