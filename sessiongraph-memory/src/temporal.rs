//! Bi-temporal windows for versioned graph nodes
//!
//! - **Valid time** (`vt_start`, `vt_end`): when the fact held in the world
//! - **Transaction time** (`tt_start`, `tt_end`): when the store recorded it
//!
//! Windows are half-open: a point `p` is inside when `start <= p < end`.

use serde::{Deserialize, Serialize};

use crate::clock::{Timestamp, MAX_DATE};

/// The four bitemporal fields carried by every versioned node and by
/// `REPLACES` edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bitemporal {
    pub vt_start: Timestamp,
    pub vt_end: Timestamp,
    pub tt_start: Timestamp,
    pub tt_end: Timestamp,
}

/// Transaction-time coordinate for time-travel reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPoint {
    /// Shorthand for `tt_end = MAX_DATE`
    Current,
    At(Timestamp),
}

/// Time-travel coordinates; unset axes are unconstrained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AsOf {
    pub vt: Option<Timestamp>,
    pub tt: Option<TxPoint>,
}

impl AsOf {
    pub fn valid_at(vt: Timestamp) -> Self {
        Self {
            vt: Some(vt),
            tt: None,
        }
    }

    pub fn recorded_at(tt: Timestamp) -> Self {
        Self {
            vt: None,
            tt: Some(TxPoint::At(tt)),
        }
    }

    pub fn current() -> Self {
        Self {
            vt: None,
            tt: Some(TxPoint::Current),
        }
    }

    pub fn with_vt(mut self, vt: Timestamp) -> Self {
        self.vt = Some(vt);
        self
    }
}

impl Bitemporal {
    /// Open window starting at `valid_from` / `recorded_at`
    pub fn open(valid_from: Timestamp, recorded_at: Timestamp) -> Self {
        Self {
            vt_start: valid_from,
            vt_end: MAX_DATE,
            tt_start: recorded_at,
            tt_end: MAX_DATE,
        }
    }

    /// Stamp used on `REPLACES` edges: the new version's starts, both ends open
    pub fn edge_stamp(&self) -> Self {
        Self::open(self.vt_start, self.tt_start)
    }

    /// The active version is the one whose transaction window is still open
    pub fn is_active(&self) -> bool {
        self.tt_end.is_open()
    }

    pub fn was_valid_at(&self, vt: Timestamp) -> bool {
        self.vt_start <= vt && vt < self.vt_end
    }

    pub fn was_recorded_at(&self, tt: Timestamp) -> bool {
        self.tt_start <= tt && tt < self.tt_end
    }

    /// Whether this window satisfies every constrained axis of `as_of`
    pub fn matches(&self, as_of: &AsOf) -> bool {
        let vt_ok = as_of.vt.map_or(true, |vt| self.was_valid_at(vt));
        let tt_ok = match as_of.tt {
            None => true,
            Some(TxPoint::Current) => self.is_active(),
            Some(TxPoint::At(tt)) => self.was_recorded_at(tt),
        };
        vt_ok && tt_ok
    }

    /// Close the transaction window (superseded or soft-deleted)
    pub fn close_transaction(&mut self, at: Timestamp) {
        self.tt_end = at;
    }

    /// Close both windows (invalidated in place)
    pub fn invalidate(&mut self, at: Timestamp) {
        self.vt_end = at.max(self.vt_start);
        self.tt_end = at;
    }

    /// `vt_start <= vt_end` and `tt_start <= tt_end`
    pub fn is_well_formed(&self) -> bool {
        self.vt_start <= self.vt_end && self.tt_start <= self.tt_end
    }
}
