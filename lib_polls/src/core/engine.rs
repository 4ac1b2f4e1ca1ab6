//! # Vote Engine
//!
//! The per-poll state machine behind every vote and every administrative
//! change to a poll.
//!
//! ## Transaction shape
//!
//! For a single poll id, each mutating operation runs as:
//!
//! 1.  acquire the poll's lock from the `LockTable`;
//! 2.  load a working copy from the `PollStore`;
//! 3.  check preconditions and mutate the copy;
//! 4.  `save` the copy;
//! 5.  release the lock;
//! 6.  publish the new snapshot on the `BroadcastHub`.
//!
//! The copy only becomes visible through a confirmed `save`. When the save
//! fails the copy is discarded, so the stored tally never advances without
//! persistence and the caller may safely retry. Operations on different poll
//! ids take different locks and never wait on one another.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::clock::{Clock, SystemClock};
use crate::core::hub::BroadcastHub;
use crate::core::lock_table::LockTable;
use crate::core::poll::{NewPoll, Poll, PollPatch, PollSnapshot, VoteHistoryEntry};
use crate::core::stats::{summarize, PollSummary};
use crate::error::{StoreError, VoteError};
use crate::store::PollStore;

/// Default bound for store reads.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// # Vote Engine
///
/// Owns the lock table and talks to the store and the hub. Share it behind an
/// `Arc`; `submit` needs one.
pub struct VoteEngine<S> {
    store: S,
    hub: BroadcastHub,
    clock: Arc<dyn Clock>,
    locks: LockTable,
    store_timeout: Duration,
}

impl<S: PollStore> VoteEngine<S> {
    pub fn new(store: S, hub: BroadcastHub) -> Self {
        Self {
            store,
            hub,
            clock: Arc::new(SystemClock),
            locks: LockTable::new(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bounds every store read. Writes are bounded by the backend itself so
    /// that a timed-out write can never have committed behind our back.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    async fn read<T>(&self, fut: impl Future<Output = Result<T, StoreError>>) -> Result<T, StoreError> {
        tokio::time::timeout(self.store_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout)?
    }

    async fn persist(&self, poll_id: &str, poll: Poll) -> Result<(), VoteError> {
        self.store.save(poll).await.map_err(|e| {
            match &e {
                StoreError::NotFound => debug!(poll = %poll_id, "Poll vanished before save"),
                other => error!(poll = %poll_id, error = %other, "Failed to persist poll"),
            }
            VoteError::from(e)
        })
    }

    /// # Cast
    ///
    /// Records one vote of `identity` for the option at `option_index`.
    ///
    /// Preconditions are checked in this order: the poll exists, the window
    /// has opened, the window has not closed, `identity` has not voted, the
    /// index is in range.
    pub async fn cast(&self, poll_id: &str, identity: &str, option_index: i64) -> Result<PollSnapshot, VoteError> {
        let snapshot = {
            let _guard = self.locks.acquire(poll_id).await;

            let mut poll = self.read(self.store.get(poll_id)).await?;
            let now = self.clock.now();
            let index = match poll.admit(identity, option_index, now) {
                Ok(index) => index,
                Err(VoteError::DuplicateVote) => {
                    debug!(poll = %poll_id, identity, "Duplicate vote rejected");
                    return Err(VoteError::DuplicateVote);
                }
                Err(e) => {
                    debug!(poll = %poll_id, identity, error = %e, "Vote rejected");
                    return Err(e);
                }
            };

            poll.record_vote(identity, index, now);
            let snapshot = poll.snapshot();
            self.persist(poll_id, poll).await?;
            snapshot
        };

        debug!(poll = %poll_id, revision = snapshot.revision, "Vote committed");
        self.hub.publish(snapshot.clone());
        Ok(snapshot)
    }

    /// Creates a poll on behalf of `created_by`.
    pub async fn create(&self, new_poll: NewPoll, created_by: &str) -> Result<PollSnapshot, VoteError> {
        new_poll.validate()?;
        let poll = new_poll.into_poll(created_by, self.clock.now());
        let snapshot = poll.snapshot();

        self.store.insert(poll).await.map_err(|e| {
            error!(error = %e, "Failed to insert poll");
            VoteError::from(e)
        })?;

        info!(poll = %snapshot.id, created_by, "Poll created");
        self.hub.publish(snapshot.clone());
        Ok(snapshot)
    }

    /// Replaces the question and/or options of a poll. A new option list
    /// starts from zero votes while the voter list is kept as is.
    pub async fn update(&self, poll_id: &str, patch: PollPatch) -> Result<PollSnapshot, VoteError> {
        patch.validate()?;

        let snapshot = {
            let _guard = self.locks.acquire(poll_id).await;
            let mut poll = self.read(self.store.get(poll_id)).await?;
            if patch.options.is_some() && !poll.voters.is_empty() {
                warn!(
                    poll = %poll_id,
                    voters = poll.voters.len(),
                    "Option list replaced; tally reset, existing voters stay locked out"
                );
            }
            poll.apply_patch(patch, self.clock.now());
            let snapshot = poll.snapshot();
            self.persist(poll_id, poll).await?;
            snapshot
        };

        info!(poll = %poll_id, revision = snapshot.revision, "Poll updated");
        self.hub.publish(snapshot.clone());
        Ok(snapshot)
    }

    /// Deletes a poll. Votes queued behind the deletion observe `NotFound`.
    pub async fn delete(&self, poll_id: &str) -> Result<(), VoteError> {
        {
            let _guard = self.locks.acquire(poll_id).await;
            self.store.delete(poll_id).await.map_err(|e| {
                if e != StoreError::NotFound {
                    error!(poll = %poll_id, error = %e, "Failed to delete poll");
                }
                VoteError::from(e)
            })?;
        }
        self.hub.retire(poll_id);
        info!(poll = %poll_id, "Poll deleted");
        Ok(())
    }

    pub async fn get(&self, poll_id: &str) -> Result<Poll, VoteError> {
        Ok(self.read(self.store.get(poll_id)).await?)
    }

    /// All polls, newest first.
    pub async fn list(&self) -> Result<Vec<Poll>, VoteError> {
        Ok(self.read(self.store.list()).await?)
    }

    pub async fn summary(&self, poll_id: &str) -> Result<PollSummary, VoteError> {
        let poll = self.get(poll_id).await?;
        Ok(summarize(&poll))
    }

    /// Every poll `identity` voted in, newest poll first.
    pub async fn vote_history(&self, identity: &str) -> Result<Vec<VoteHistoryEntry>, VoteError> {
        let polls = self.list().await?;
        Ok(polls
            .iter()
            .filter(|poll| poll.has_voted(identity))
            .map(|poll| VoteHistoryEntry {
                poll_id: poll.id.clone(),
                question: poll.question.clone(),
                selected_option: poll.selected_option(identity).map(str::to_string),
            })
            .collect())
    }

    /// Polls currently holding or awaiting their lock.
    pub fn busy_polls(&self) -> usize {
        self.locks.active()
    }
}

impl<S: PollStore + 'static> VoteEngine<S> {
    /// # Submit
    ///
    /// Starts `cast` as its own task right away. The vote commits whether or
    /// not anyone awaits the returned ticket; dropping the ticket only
    /// discards the outcome.
    pub fn submit(self: &Arc<Self>, poll_id: impl Into<String>, identity: impl Into<String>, option_index: i64) -> VoteTicket {
        let engine = Arc::clone(self);
        let poll_id = poll_id.into();
        let identity = identity.into();
        VoteTicket {
            handle: tokio::spawn(async move { engine.cast(&poll_id, &identity, option_index).await }),
        }
    }
}

/// Handle to a vote started with `VoteEngine::submit`.
pub struct VoteTicket {
    handle: JoinHandle<Result<PollSnapshot, VoteError>>,
}

impl VoteTicket {
    pub async fn outcome(self) -> Result<PollSnapshot, VoteError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Vote task failed");
                Err(VoteError::Storage(format!("vote task failed: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::poll::PollOption;
    use crate::store::MemoryPollStore;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory store whose calls can be switched to fail or to stall.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryPollStore,
        fail_saves: AtomicBool,
        stall_saves: AtomicBool,
        stall_gets: AtomicBool,
        // Saves of this one poll take half a second.
        stall_poll: std::sync::Mutex<Option<String>>,
    }

    impl PollStore for FlakyStore {
        async fn get(&self, id: &str) -> Result<Poll, StoreError> {
            if self.stall_gets.load(Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            }
            self.inner.get(id).await
        }

        async fn list(&self) -> Result<Vec<Poll>, StoreError> {
            self.inner.list().await
        }

        async fn insert(&self, poll: Poll) -> Result<(), StoreError> {
            self.inner.insert(poll).await
        }

        async fn save(&self, poll: Poll) -> Result<(), StoreError> {
            if self.stall_saves.load(Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
            let slow = self.stall_poll.lock().unwrap().as_deref() == Some(poll.id.as_str());
            if slow {
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            }
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("disk full".into()));
            }
            self.inner.save(poll).await
        }

        async fn delete(&self, id: &str) -> Result<(), StoreError> {
            self.inner.delete(id).await
        }
    }

    fn opening() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 20, 12, 0, 0).unwrap()
    }

    fn closing() -> DateTime<Utc> {
        opening() + ChronoDuration::hours(24)
    }

    fn new_poll(options: &[&str]) -> NewPoll {
        NewPoll {
            question: "Favourite season?".into(),
            options: options.iter().map(|o| o.to_string()).collect(),
            start_at: opening(),
            end_at: closing(),
        }
    }

    fn engine_at<S: PollStore>(store: S, now: DateTime<Utc>) -> (VoteEngine<S>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let engine = VoteEngine::new(store, BroadcastHub::new(256)).with_clock(clock.clone());
        (engine, clock)
    }

    #[tokio::test]
    async fn test_cast_records_vote_and_publishes() {
        let (engine, _clock) = engine_at(MemoryPollStore::new(), opening() + ChronoDuration::hours(1));
        let mut viewer = engine.hub().subscribe();

        let created = engine.create(new_poll(&["spring", "summer"]), "admin").await.unwrap();
        assert_eq!(viewer.recv().await.unwrap().revision, 0);

        let snap = engine.cast(&created.id, "u1", 1).await.unwrap();
        assert_eq!(snap.options[1].votes, 1);
        assert_eq!(snap.voters.len(), 1);
        assert_eq!(snap.voters[0].identity, "u1");
        assert_eq!(snap.revision, 1);

        let pushed = viewer.recv().await.unwrap();
        assert_eq!(*pushed, snap);

        let stored = engine.get(&created.id).await.unwrap();
        assert_eq!(stored.options[1].votes, 1);
        assert_eq!(stored.voters[0].user_id, "u1");
    }

    #[tokio::test]
    async fn test_cast_unknown_poll_is_not_found() {
        let (engine, _clock) = engine_at(MemoryPollStore::new(), opening());
        assert_eq!(engine.cast("missing", "u1", 0).await, Err(VoteError::NotFound));
    }

    #[tokio::test]
    async fn test_window_boundaries_are_inclusive() {
        let (engine, clock) = engine_at(MemoryPollStore::new(), opening());
        let poll = engine.create(new_poll(&["a", "b"]), "admin").await.unwrap();

        clock.set(opening() - ChronoDuration::milliseconds(1));
        assert_eq!(engine.cast(&poll.id, "early", 0).await, Err(VoteError::NotYetOpen));

        clock.set(opening());
        assert!(engine.cast(&poll.id, "at-start", 0).await.is_ok());

        clock.set(closing());
        assert!(engine.cast(&poll.id, "at-end", 1).await.is_ok());

        clock.set(closing() + ChronoDuration::milliseconds(1));
        assert_eq!(engine.cast(&poll.id, "late", 0).await, Err(VoteError::Closed));

        assert_eq!(engine.get(&poll.id).await.unwrap().total_votes(), 2);
    }

    #[tokio::test]
    async fn test_second_vote_is_duplicate() {
        let (engine, _clock) = engine_at(MemoryPollStore::new(), opening());
        let poll = engine.create(new_poll(&["a", "b"]), "admin").await.unwrap();

        engine.cast(&poll.id, "u1", 0).await.unwrap();
        assert_eq!(engine.cast(&poll.id, "u1", 1).await, Err(VoteError::DuplicateVote));
        assert_eq!(
            engine.cast(&poll.id, "u2", 7).await,
            Err(VoteError::InvalidOption { index: 7, options: 2 })
        );

        let stored = engine.get(&poll.id).await.unwrap();
        assert_eq!(stored.total_votes(), 1);
        assert_eq!(stored.voters.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_votes_are_not_lost() {
        let (engine, _clock) = engine_at(MemoryPollStore::new(), opening());
        let engine = Arc::new(engine);
        let poll = engine.create(new_poll(&["a", "b", "c"]), "admin").await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..200 {
            let engine = Arc::clone(&engine);
            let id = poll.id.clone();
            tasks.push(tokio::spawn(async move {
                // Every identity tries twice; exactly one attempt may land.
                let first = engine.cast(&id, &format!("u{i}"), i % 3).await;
                let second = engine.cast(&id, &format!("u{i}"), (i + 1) % 3).await;
                (first, second)
            }));
        }

        let mut committed = 0;
        for task in tasks {
            let (first, second) = task.await.unwrap();
            assert!(first.is_ok());
            assert_eq!(second, Err(VoteError::DuplicateVote));
            committed += 1;
        }

        let stored = engine.get(&poll.id).await.unwrap();
        assert_eq!(stored.total_votes(), committed);
        assert_eq!(stored.voters.len() as u64, committed);
        let distinct: HashSet<&str> = stored.voters.iter().map(|v| v.user_id.as_str()).collect();
        assert_eq!(distinct.len() as u64, committed);
        assert_eq!(stored.revision, committed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_identity_racing_itself_wins_once() {
        let (engine, _clock) = engine_at(MemoryPollStore::new(), opening());
        let engine = Arc::new(engine);
        let poll = engine.create(new_poll(&["a", "b"]), "admin").await.unwrap();

        let tickets: Vec<VoteTicket> = (0..32).map(|i| engine.submit(poll.id.clone(), "same", i % 2)).collect();
        let mut ok = 0;
        let mut dup = 0;
        for ticket in tickets {
            match ticket.outcome().await {
                Ok(_) => ok += 1,
                Err(VoteError::DuplicateVote) => dup += 1,
                Err(e) => panic!("unexpected error {e:?}"),
            }
        }
        assert_eq!((ok, dup), (1, 31));
        assert_eq!(engine.get(&poll.id).await.unwrap().total_votes(), 1);
    }

    #[tokio::test]
    async fn test_failed_save_leaves_no_trace() {
        let (engine, _clock) = engine_at(Arc::new(FlakyStore::default()), opening());
        let mut viewer = engine.hub().subscribe();
        let poll = engine.create(new_poll(&["a", "b"]), "admin").await.unwrap();
        viewer.recv().await.unwrap();

        engine.store().fail_saves.store(true, Ordering::SeqCst);
        assert!(matches!(engine.cast(&poll.id, "u1", 0).await, Err(VoteError::Storage(_))));

        let stored = engine.get(&poll.id).await.unwrap();
        assert_eq!(stored.total_votes(), 0);
        assert!(stored.voters.is_empty());
        assert_eq!(stored.revision, 0);
        assert!(viewer.try_recv().is_none());

        // The vote never committed, so the same identity may retry.
        engine.store().fail_saves.store(false, Ordering::SeqCst);
        let snap = engine.cast(&poll.id, "u1", 0).await.unwrap();
        assert_eq!(snap.options[0].votes, 1);
        assert_eq!(snap.revision, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_delete_mid_flight_yields_not_found() {
        let (engine, _clock) = engine_at(Arc::new(FlakyStore::default()), opening());
        let engine = Arc::new(engine);
        let poll = engine.create(new_poll(&["a", "b"]), "admin").await.unwrap();

        // Slow saves widen the window: the first vote holds the lock while
        // the deletion and a second vote queue up behind it.
        engine.store().stall_saves.store(true, Ordering::SeqCst);
        let first = engine.submit(poll.id.clone(), "u1", 0);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let deleter = {
            let engine = Arc::clone(&engine);
            let id = poll.id.clone();
            tokio::spawn(async move { engine.delete(&id).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let loser = engine.submit(poll.id.clone(), "u2", 1);

        assert!(first.outcome().await.is_ok());
        deleter.await.unwrap().unwrap();
        assert_eq!(loser.outcome().await, Err(VoteError::NotFound));
        assert_eq!(engine.get(&poll.id).await, Err(VoteError::NotFound));
        assert!(engine.store().inner.is_empty().await);
    }

    #[tokio::test]
    async fn test_dropped_ticket_still_commits() {
        let (engine, _clock) = engine_at(MemoryPollStore::new(), opening());
        let engine = Arc::new(engine);
        let poll = engine.create(new_poll(&["a"]), "admin").await.unwrap();
        let mut viewer = engine.hub().subscribe();

        drop(engine.submit(poll.id.clone(), "u1", 0));

        let pushed = tokio::time::timeout(std::time::Duration::from_secs(1), viewer.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pushed.options[0].votes, 1);
        assert!(engine.get(&poll.id).await.unwrap().has_voted("u1"));
    }

    #[tokio::test]
    async fn test_update_resets_tally_and_keeps_voters() {
        let (engine, _clock) = engine_at(MemoryPollStore::new(), opening());
        let poll = engine.create(new_poll(&["a", "b"]), "admin").await.unwrap();
        engine.cast(&poll.id, "u1", 1).await.unwrap();

        let updated = engine
            .update(
                &poll.id,
                PollPatch {
                    question: Some("Renamed".into()),
                    options: Some(vec!["x".into(), "y".into(), "z".into()]),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.question, "Renamed");
        assert!(updated.options.iter().all(|o| o.votes == 0));
        assert_eq!(updated.voters.len(), 1);
        assert_eq!(updated.revision, 2);

        assert_eq!(engine.cast(&poll.id, "u1", 0).await, Err(VoteError::DuplicateVote));
        assert!(engine.cast(&poll.id, "u2", 2).await.is_ok());

        let question_only = engine
            .update(&poll.id, PollPatch { question: Some("Again".into()), options: None })
            .await
            .unwrap();
        assert_eq!(question_only.options[2], PollOption { name: "z".into(), votes: 1 });

        assert!(matches!(
            engine.update(&poll.id, PollPatch { question: Some(" ".into()), options: None }).await,
            Err(VoteError::InvalidInput(_))
        ));
        assert_eq!(engine.update("missing", PollPatch::default()).await.unwrap_err(), VoteError::NotFound);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input_without_storing() {
        let (engine, _clock) = engine_at(MemoryPollStore::new(), opening());
        let mut bad = new_poll(&["a"]);
        bad.end_at = bad.start_at - ChronoDuration::minutes(1);
        assert!(matches!(engine.create(bad, "admin").await, Err(VoteError::InvalidInput(_))));
        assert!(engine.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_twice_is_not_found() {
        let (engine, _clock) = engine_at(MemoryPollStore::new(), opening());
        let poll = engine.create(new_poll(&["a"]), "admin").await.unwrap();
        engine.delete(&poll.id).await.unwrap();
        assert_eq!(engine.delete(&poll.id).await, Err(VoteError::NotFound));
    }

    #[tokio::test]
    async fn test_vote_history_and_summary() {
        let (engine, clock) = engine_at(MemoryPollStore::new(), opening());
        let first = engine.create(new_poll(&["a", "b"]), "admin").await.unwrap();
        clock.advance(ChronoDuration::minutes(1));
        let second = engine.create(new_poll(&["c", "d"]), "admin").await.unwrap();
        clock.advance(ChronoDuration::minutes(1));
        let _untouched = engine.create(new_poll(&["e"]), "admin").await.unwrap();

        engine.cast(&first.id, "u1", 1).await.unwrap();
        engine.cast(&second.id, "u1", 0).await.unwrap();
        engine.cast(&second.id, "u2", 0).await.unwrap();

        let history = engine.vote_history("u1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].poll_id, second.id);
        assert_eq!(history[0].selected_option.as_deref(), Some("c"));
        assert_eq!(history[1].selected_option.as_deref(), Some("b"));

        let summary = engine.summary(&second.id).await.unwrap();
        assert_eq!(summary.total_votes, 2);
        assert_eq!(summary.top_option_name, "c");
        assert_eq!(summary.per_option[0].percentage, 100.0);
    }

    #[tokio::test]
    async fn test_stalled_read_times_out_and_releases_lock() {
        let (engine, _clock) = engine_at(FlakyStore::default(), opening());
        let engine = engine.with_store_timeout(std::time::Duration::from_millis(50));
        let poll = engine.create(new_poll(&["a", "b"]), "admin").await.unwrap();

        engine.store().stall_gets.store(true, Ordering::SeqCst);
        let outcome = engine.cast(&poll.id, "u1", 0).await;
        assert!(matches!(outcome, Err(VoteError::Storage(_))), "got {outcome:?}");
        assert_eq!(engine.busy_polls(), 0);

        engine.store().stall_gets.store(false, Ordering::SeqCst);
        let snap = engine.cast(&poll.id, "u1", 0).await.unwrap();
        assert_eq!(snap.options[0].votes, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slow_poll_does_not_hold_up_other_polls() {
        let (engine, _clock) = engine_at(FlakyStore::default(), opening());
        let engine = Arc::new(engine);
        let slow = engine.create(new_poll(&["a"]), "admin").await.unwrap();
        let fast = engine.create(new_poll(&["a"]), "admin").await.unwrap();
        *engine.store().stall_poll.lock().unwrap() = Some(slow.id.clone());

        let slow_vote = engine.submit(slow.id.clone(), "u1", 0);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        engine.cast(&fast.id, "u1", 0).await.unwrap();
        assert!(started.elapsed() < std::time::Duration::from_millis(250));
        assert_eq!(engine.busy_polls(), 1);

        assert_eq!(slow_vote.outcome().await.unwrap().options[0].votes, 1);
    }
}
