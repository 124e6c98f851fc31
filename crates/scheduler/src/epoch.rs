//! Epoch identifiers for document-open lifetimes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one "document open" lifetime of a panel.
///
/// Epochs issued by the same [`EpochClock`] are strictly increasing, so
/// comparing two epochs tells which open is newer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Epoch(u64);

impl Epoch {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch#{}", self.0)
    }
}

/// Monotonic source of epochs for one logical slot.
#[derive(Debug, Default)]
pub struct EpochClock {
    current: AtomicU64,
}

impl EpochClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next epoch. The first call returns epoch 1.
    pub fn advance(&self) -> Epoch {
        Epoch(self.current.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Most recently issued epoch, or `None` before the first `advance`.
    pub fn current(&self) -> Option<Epoch> {
        match self.current.load(Ordering::Acquire) {
            0 => None,
            raw => Some(Epoch(raw)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_starts_empty_and_counts_up() {
        let clock = EpochClock::new();
        assert_eq!(clock.current(), None);

        let first = clock.advance();
        let second = clock.advance();

        assert_eq!(first, Epoch::new(1));
        assert!(second > first);
        assert_eq!(clock.current(), Some(second));
    }

    #[test]
    fn epoch_displays_with_prefix() {
        assert_eq!(Epoch::new(7).to_string(), "epoch#7");
    }
}
