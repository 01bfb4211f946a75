//! Collapses a batch to one candidate per natural key.

use crate::domain::{EventCandidate, NaturalKey};
use std::collections::HashMap;

/// Keeps the more complete of two candidates sharing a key and fills its
/// empty link fields from the other. First-seen wins on equal score.
fn merge(current: EventCandidate, incoming: EventCandidate) -> EventCandidate {
    let (mut winner, loser) = if incoming.completeness_score() > current.completeness_score() {
        (incoming, current)
    } else {
        (current, incoming)
    };
    if winner.ticket_url.is_none() {
        winner.ticket_url = loser.ticket_url;
    }
    if winner.image_url.is_none() {
        winner.image_url = loser.image_url;
    }
    if winner.ticket_sale_date.is_none() {
        winner.ticket_sale_date = loser.ticket_sale_date;
    }
    winner
}

/// Output preserves the order in which each key was first seen.
pub fn deduplicate(candidates: Vec<EventCandidate>) -> Vec<EventCandidate> {
    let mut index: HashMap<NaturalKey, usize> = HashMap::with_capacity(candidates.len());
    let mut slots: Vec<Option<EventCandidate>> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let key = candidate.natural_key();
        match index.get(&key) {
            Some(&slot) => {
                if let Some(current) = slots[slot].take() {
                    slots[slot] = Some(merge(current, candidate));
                }
            }
            None => {
                index.insert(key, slots.len());
                slots.push(Some(candidate));
            }
        }
    }

    slots.into_iter().flatten().collect()
}
