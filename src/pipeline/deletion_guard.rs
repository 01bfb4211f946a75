use crate::domain::{EventCandidate, NaturalKey};
use std::collections::HashSet;
use tracing::debug;

/// Drops candidates whose natural key an operator has deleted. Applied after
/// dedup and before any write.
pub fn exclude_deleted(
    candidates: Vec<EventCandidate>,
    deleted: &HashSet<NaturalKey>,
) -> (Vec<EventCandidate>, usize) {
    if deleted.is_empty() {
        return (candidates, 0);
    }
    let before = candidates.len();
    let kept: Vec<EventCandidate> = candidates
        .into_iter()
        .filter(|c| {
            let key = c.natural_key();
            let blocked = deleted.contains(&key);
            if blocked {
                debug!("Skipping deleted event {}", key);
            }
            !blocked
        })
        .collect();
    let excluded = before - kept.len();
    (kept, excluded)
}
