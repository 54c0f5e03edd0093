#![warn(missing_docs)]

//! facilitator-link: the per-remote reliability engine.
//!
//! A [`Link`] owns everything one remote endpoint needs: sequence
//! assignment, retransmission timers, duplicate suppression, ordered
//! release, and keepalives. It is driven entirely by the host pump through
//! `process_datagram` / `update` / `encode_pending`; it performs no I/O of
//! its own.

mod link;
mod link_state;
mod statistics;

pub use link::{Delivered, Link};
pub use link_state::LinkState;
pub use statistics::LinkStatistics;
