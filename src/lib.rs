//! Unsubscriber: automated removal from unwanted mailing lists.
//!
//! A candidate sender is run through an ordered chain of unsubscribe
//! strategies (RFC 8058 one-click header, direct link, mailto
//! fallback). The first success wins; total exhaustion lands the sender on
//! the must-delete worklist.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod candidate;
pub mod chain;
pub mod config;
pub mod credentials;
pub mod gate;
pub mod logging;
pub mod store;
pub mod strategies;
