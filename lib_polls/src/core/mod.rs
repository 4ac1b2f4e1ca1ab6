//! # Core Voting Module
//!
//! ## Core Components:
//!
//! - **`poll`**: the poll document, its snapshot, and the admission rules.
//! - **`engine`**: the `VoteEngine`, which serializes every mutation of one
//!   poll id through the `lock_table` and publishes committed snapshots.
//! - **`hub`**: the `BroadcastHub` registry of live subscribers.
//! - **`stats`**: `summarize`, a pure function from a poll to its summary.
//! - **`clock`**: the wall-clock seam used by admission checks.

pub mod clock;
pub mod engine;
pub mod hub;
pub mod lock_table;
pub mod poll;
pub mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{VoteEngine, VoteTicket, DEFAULT_STORE_TIMEOUT};
pub use hub::{BroadcastHub, PublishReport, Subscription, DEFAULT_SUBSCRIBER_BUFFER};
pub use poll::{
    NewPoll, Poll, PollId, PollOption, PollPatch, PollPhase, PollSnapshot, SnapshotVoter,
    VoteHistoryEntry, VoterRecord,
};
pub use stats::{summarize, OptionShare, PollSummary, NO_TOP_OPTION};
