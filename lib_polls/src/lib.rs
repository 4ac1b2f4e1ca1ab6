//! # lib_polls
//!
//! The voting core of the real-time polls service. Everything a server needs
//! to admit votes safely and push tallies to live viewers is here; transports
//! (HTTP, WebSocket) live in the `servers` crate.
//!
//! ## Modules:
//!
//! - **`core`**: the poll data model, the per-poll `VoteEngine`, the
//!   `BroadcastHub` and the pure `summarize` statistics function.
//! - **`store`**: the `PollStore` seam with an in-memory backend and, behind
//!   the `postgres` feature, a PostgreSQL backend.
//! - **`identity`**: the `IdentityProvider` seam and role checks.
//! - **`error`**: the error taxonomy shared by all of the above.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod core;
pub mod error;
pub mod identity;
pub mod store;

pub use crate::core::{
    summarize, BroadcastHub, Clock, NewPoll, Poll, PollOption, PollPatch, PollPhase, PollSnapshot,
    PollSummary, Subscription, SystemClock, VoteEngine, VoteHistoryEntry, VoteTicket, VoterRecord,
};
pub use error::{AuthError, StoreError, VoteError};
pub use identity::{IdentityProvider, Principal, Role, TokenTable};
pub use store::{MemoryPollStore, PollStore};
