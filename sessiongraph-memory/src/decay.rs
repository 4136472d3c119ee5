//! Relevance decay for memories
//!
//! `score = min(1, type_weight * exp(-λ * age_days) * access_factor)`, with
//! pinned memories fixed at 1.0. Pure and synchronous.

use crate::clock::{Timestamp, MS_PER_DAY};
use crate::entities::MemoryType;

/// Exponential decay rate per day
pub const DECAY_LAMBDA: f64 = 0.01;

/// Anything carrying the metadata the scorer reads
pub trait Decayable {
    fn memory_type(&self) -> &MemoryType;
    fn created_at(&self) -> Timestamp;
    fn access_count(&self) -> u64;
    fn pinned(&self) -> bool;
}

/// Base weight per memory type
pub fn type_weight(memory_type: &MemoryType) -> f64 {
    match memory_type {
        MemoryType::Decision => 1.0,
        MemoryType::Preference => 0.9,
        MemoryType::Insight => 0.8,
        MemoryType::Fact => 0.7,
        MemoryType::Context => 0.5,
        MemoryType::Turn => 0.3,
        MemoryType::Unknown(_) => 0.5,
    }
}

/// `1 + ln(1 + n) * 0.1`
pub fn access_factor(access_count: u64) -> f64 {
    1.0 + (access_count as f64).ln_1p() * 0.1
}

/// Age in fractional days, never negative
pub fn age_days(created_at: Timestamp, now: Timestamp) -> f64 {
    let elapsed = now.as_millis().saturating_sub(created_at.as_millis());
    (elapsed as f64 / MS_PER_DAY as f64).max(0.0)
}

pub fn decay_score<T: Decayable + ?Sized>(item: &T, now: Timestamp) -> f64 {
    if item.pinned() {
        return 1.0;
    }
    let raw = type_weight(item.memory_type())
        * (-DECAY_LAMBDA * age_days(item.created_at(), now)).exp()
        * access_factor(item.access_count());
    raw.min(1.0)
}

/// An item with its computed score attached
#[derive(Debug, Clone, PartialEq)]
pub struct DecayScored<T> {
    pub item: T,
    pub decay_score: f64,
}

/// Keep items scoring at least `threshold`, highest first. Ties keep their
/// input order.
pub fn filter_by_decay_threshold<T: Decayable>(
    items: impl IntoIterator<Item = T>,
    threshold: f64,
    now: Timestamp,
) -> Vec<DecayScored<T>> {
    let mut kept: Vec<DecayScored<T>> = items
        .into_iter()
        .filter_map(|item| {
            let decay_score = decay_score(&item, now);
            (decay_score >= threshold).then_some(DecayScored { item, decay_score })
        })
        .collect();
    kept.sort_by(|a, b| b.decay_score.total_cmp(&a.decay_score));
    kept
}

/// Plain scorer input, for callers without a stored memory
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DecayInput {
    pub memory_type: MemoryType,
    pub created_at: Timestamp,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub pinned: bool,
}

impl Decayable for DecayInput {
    fn memory_type(&self) -> &MemoryType {
        &self.memory_type
    }

    fn created_at(&self) -> Timestamp {
        self.created_at
    }

    fn access_count(&self) -> u64 {
        self.access_count
    }

    fn pinned(&self) -> bool {
        self.pinned
    }
}
