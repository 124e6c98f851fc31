//! twinpage scheduling primitives
//!
//! Cooperative cancellation and epoch bookkeeping shared by the render
//! pipeline and the document loader.
//!
//! Every "document open" lifetime is identified by an [`Epoch`]. Work that
//! belongs to an epoch carries a [`CancellationToken`] issued for that epoch
//! by an [`EpochTokens`] registry, so opening a newer epoch can cancel all
//! in-flight work from older ones.
//!
//! # Example
//!
//! ```
//! use twinpage_scheduler::{EpochClock, EpochTokens};
//!
//! let clock = EpochClock::new();
//! let tokens = EpochTokens::new();
//!
//! let first = clock.advance();
//! let first_token = tokens.issue(first);
//!
//! // Opening a new document supersedes everything issued before it.
//! let second = clock.advance();
//! let second_token = tokens.issue(second);
//!
//! assert!(first_token.is_cancelled());
//! assert!(!second_token.is_cancelled());
//! ```

mod cancel;
mod epoch;

pub use cancel::{CancellationToken, EpochTokens};
pub use epoch::{Epoch, EpochClock};
