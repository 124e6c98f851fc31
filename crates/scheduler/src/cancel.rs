//! Cancellation tokens for render work
//!
//! Provides cancellation tokens that allow running renders to be stopped
//! cooperatively. A render checks its token before each unit of work and
//! stops writing output as soon as it observes the cancellation.

use crate::Epoch;
use std::collections::BTreeMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};

/// Cancellation token for cooperative cancellation
///
/// Workers periodically check `is_cancelled()` to determine if they
/// should stop processing. Clones share the same underlying state.
///
/// A token is one-shot: once cancelled it stays cancelled. New work gets a
/// new token instead of resetting an old one.
///
/// # Example
///
/// ```
/// use twinpage_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, live token.
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    /// Cancel this token and every clone of it.
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once `cancel()` has been called on this token or any clone.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tokens for in-flight work, keyed by the epoch they belong to.
///
/// Issuing a token for a new epoch cancels and forgets every token issued for
/// an older one, so stale work can never outlive the epoch that replaced it.
///
/// # Example
///
/// ```
/// use twinpage_scheduler::{Epoch, EpochTokens};
///
/// let tokens = EpochTokens::new();
/// let token = tokens.issue(Epoch::new(1));
///
/// let next = tokens.issue(Epoch::new(2));
/// assert!(token.is_cancelled());
/// assert!(!next.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct EpochTokens {
    tokens: Arc<Mutex<BTreeMap<Epoch, CancellationToken>>>,
}

impl EpochTokens {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the token for `epoch`.
    ///
    /// Tokens of older epochs are cancelled and removed. Issuing again for an
    /// epoch that is already registered returns the existing token.
    pub fn issue(&self, epoch: Epoch) -> CancellationToken {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);

        let newer = tokens.split_off(&epoch);
        for stale in tokens.values() {
            stale.cancel();
        }
        *tokens = newer;

        tokens.entry(epoch).or_default().clone()
    }

    /// Cancel every registered token.
    ///
    /// Returns the number of tokens cancelled.
    pub fn cancel_all(&self) -> usize {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    /// Forget the token for `epoch` without cancelling it.
    ///
    /// Returns `true` if the epoch was registered.
    pub fn retire(&self, epoch: Epoch) -> bool {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens.remove(&epoch).is_some()
    }

    /// Token registered for `epoch`, if any.
    pub fn get(&self, epoch: Epoch) -> Option<CancellationToken> {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens.get(&epoch).cloned()
    }
}
