//! # Poll Data Model
//!
//! The persisted poll document, the snapshot pushed to viewers, and the one
//! pure admission function every vote goes through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::VoteError;

/// Opaque poll identity.
pub type PollId = String;

/// A single answer of a poll and its running tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub name: String,
    #[serde(default)]
    pub votes: u64,
}

impl PollOption {
    fn fresh(name: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            votes: 0,
        }
    }
}

/// Who voted and for which ballot key. Written once, never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterRecord {
    pub user_id: String,
    pub option_index: usize,
}

/// # Poll
///
/// The document owned by the `PollStore`. `revision` counts persisted
/// mutations and orders the snapshots derived from this document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    pub options: Vec<PollOption>,
    #[serde(default)]
    pub voters: Vec<VoterRecord>,
    pub created_by: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
}

/// Lifecycle phase of a poll, derived from the clock on every evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollPhase {
    Pending,
    Open,
    Closed,
}

impl PollPhase {
    /// The voting window is closed-closed: both `start_at` and `end_at`
    /// themselves are `Open`.
    pub fn at(now: DateTime<Utc>, start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> Self {
        if now < start_at {
            PollPhase::Pending
        } else if now > end_at {
            PollPhase::Closed
        } else {
            PollPhase::Open
        }
    }
}

impl Poll {
    pub fn phase_at(&self, now: DateTime<Utc>) -> PollPhase {
        PollPhase::at(now, self.start_at, self.end_at)
    }

    pub fn has_voted(&self, identity: &str) -> bool {
        self.voters.iter().any(|v| v.user_id == identity)
    }

    pub fn total_votes(&self) -> u64 {
        self.options.iter().map(|o| o.votes).sum()
    }

    /// The name of the option `identity` picked, if it voted and the option
    /// still exists.
    pub fn selected_option(&self, identity: &str) -> Option<&str> {
        self.voters
            .iter()
            .find(|v| v.user_id == identity)
            .and_then(|v| self.options.get(v.option_index))
            .map(|o| o.name.as_str())
    }

    /// Runs the vote preconditions in their fixed order and returns the
    /// validated ballot key. Nothing is mutated here.
    pub fn admit(&self, identity: &str, option_index: i64, now: DateTime<Utc>) -> Result<usize, VoteError> {
        match self.phase_at(now) {
            PollPhase::Pending => return Err(VoteError::NotYetOpen),
            PollPhase::Closed => return Err(VoteError::Closed),
            PollPhase::Open => {}
        }

        if self.has_voted(identity) {
            return Err(VoteError::DuplicateVote);
        }

        usize::try_from(option_index)
            .ok()
            .filter(|i| *i < self.options.len())
            .ok_or(VoteError::InvalidOption {
                index: option_index,
                options: self.options.len(),
            })
    }

    /// Applies an admitted vote. Callers must have run `admit` first.
    pub(crate) fn record_vote(&mut self, identity: &str, index: usize, now: DateTime<Utc>) {
        self.options[index].votes += 1;
        self.voters.push(VoterRecord {
            user_id: identity.to_string(),
            option_index: index,
        });
        self.touch(now);
    }

    /// Replacing the option list zeroes the tally but keeps `voters`, so an
    /// identity that voted before the reset stays locked out.
    pub(crate) fn apply_patch(&mut self, patch: PollPatch, now: DateTime<Utc>) {
        if let Some(question) = patch.question {
            self.question = question.trim().to_string();
        }
        if let Some(options) = patch.options {
            self.options = options.iter().map(|name| PollOption::fresh(name)).collect();
        }
        self.touch(now);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.revision += 1;
    }

    pub fn snapshot(&self) -> PollSnapshot {
        PollSnapshot {
            id: self.id.clone(),
            question: self.question.clone(),
            options: self.options.clone(),
            voters: self
                .voters
                .iter()
                .map(|v| SnapshotVoter {
                    identity: v.user_id.clone(),
                    option_index: v.option_index,
                })
                .collect(),
            created_by: self.created_by.clone(),
            start_at: self.start_at,
            end_at: self.end_at,
            revision: self.revision,
        }
    }
}

/// A voter entry as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotVoter {
    pub identity: String,
    pub option_index: usize,
}

/// # Poll Snapshot
///
/// Immutable copy of a poll at one revision. This is both the broadcast
/// payload and the response body of a successful vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSnapshot {
    pub id: PollId,
    pub question: String,
    pub options: Vec<PollOption>,
    pub voters: Vec<SnapshotVoter>,
    pub created_by: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub revision: u64,
}

/// Request to create a poll.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPoll {
    pub question: String,
    pub options: Vec<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

impl NewPoll {
    pub fn validate(&self) -> Result<(), VoteError> {
        validate_question(&self.question)?;
        validate_options(&self.options)?;
        if self.start_at >= self.end_at {
            return Err(VoteError::InvalidInput(
                "startAt must be earlier than endAt".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds the initial document. Does not validate; see `validate`.
    pub fn into_poll(self, created_by: &str, now: DateTime<Utc>) -> Poll {
        Poll {
            id: Uuid::new_v4().to_string(),
            question: self.question.trim().to_string(),
            options: self.options.iter().map(|name| PollOption::fresh(name)).collect(),
            voters: Vec::new(),
            created_by: created_by.to_string(),
            start_at: self.start_at,
            end_at: self.end_at,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }
}

/// Partial update of a poll. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollPatch {
    pub question: Option<String>,
    pub options: Option<Vec<String>>,
}

impl PollPatch {
    pub fn validate(&self) -> Result<(), VoteError> {
        if let Some(question) = &self.question {
            validate_question(question)?;
        }
        if let Some(options) = &self.options {
            validate_options(options)?;
        }
        Ok(())
    }
}

fn validate_question(question: &str) -> Result<(), VoteError> {
    if question.trim().is_empty() {
        return Err(VoteError::InvalidInput("question must not be empty".to_string()));
    }
    Ok(())
}

fn validate_options(options: &[String]) -> Result<(), VoteError> {
    if options.is_empty() {
        return Err(VoteError::InvalidInput(
            "at least one option is required".to_string(),
        ));
    }
    if let Some(pos) = options.iter().position(|o| o.trim().is_empty()) {
        return Err(VoteError::InvalidInput(format!("option {pos} has an empty name")));
    }
    Ok(())
}

/// One line of an identity's voting history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteHistoryEntry {
    pub poll_id: PollId,
    pub question: String,
    pub selected_option: Option<String>,
}
