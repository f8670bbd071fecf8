//! Single-unlocked invariant planning.
//!
//! Decides which services to lock when more than one online service is
//! unlocked.  Pure: the engine issues the actual lock calls.

use super::state::ArbiterState;

/// Outcome of a violated invariant: one survivor, the rest to be locked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enforcement {
    pub keep: String,
    pub lock: Vec<String>,
}

/// Returns `None` when at most one online service is unlocked.
///
/// The survivor is the active service when it is among the unlocked set,
/// otherwise the lowest priority number, ties broken by identifier.
pub fn plan(state: &ArbiterState) -> Option<Enforcement> {
    let unlocked: Vec<_> = state.services.values().filter(|s| s.is_unlocked()).collect();
    if unlocked.len() <= 1 {
        return None;
    }

    let keep = state
        .active
        .as_deref()
        .and_then(|active| unlocked.iter().find(|s| s.id == active))
        .or_else(|| {
            unlocked
                .iter()
                .min_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)))
        })
        .map(|s| s.id.clone())?;

    let lock = unlocked
        .iter()
        .filter(|s| s.id != keep)
        .map(|s| s.id.clone())
        .collect();

    Some(Enforcement { keep, lock })
}
