//! # Broadcast Hub
//!
//! Registry of live subscribers and the fan-out of poll snapshots to them.
//!
//! ## Delivery rules:
//!
//! 1.  **Zero-copy fan-out**: each snapshot is wrapped in an `Arc` once; every
//!     subscriber queue receives a clone of the pointer.
//! 2.  **Never stall**: every subscriber owns a bounded queue fed with
//!     `try_send`. A full queue loses that one snapshot for that one
//!     subscriber; a closed queue unregisters the subscriber. `publish` never
//!     awaits.
//! 3.  **Commit order per poll**: the hub remembers the highest revision it has
//!     published for each poll and discards anything at or below it. Votes
//!     publish after releasing their poll lock, so two commits may race to
//!     the hub; the later revision carries the earlier one's vote, and no
//!     subscriber ever sees a tally go backwards.
//! 4.  **No replay**: a new subscriber only sees snapshots published after it
//!     registered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::core::poll::PollSnapshot;

/// Default per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// What happened to one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers that had the snapshot queued.
    pub delivered: usize,
    /// Subscribers whose queue was full.
    pub dropped: usize,
    /// Subscribers found disconnected and removed.
    pub removed: usize,
    /// The snapshot was older than one already published for its poll.
    pub stale: bool,
}

struct SubscriberHandle {
    id: u64,
    sender: mpsc::Sender<Arc<PollSnapshot>>,
}

#[derive(Default)]
struct Registry {
    subscribers: Vec<SubscriberHandle>,
    last_revision: HashMap<String, u64>,
    closed: bool,
}

struct HubInner {
    registry: Mutex<Registry>,
    buffer: usize,
    next_id: AtomicU64,
    dropped_total: AtomicU64,
}

impl HubInner {
    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// # Broadcast Hub
///
/// Cheap to clone; all clones share one registry. Created once at process
/// start and closed at shutdown.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl BroadcastHub {
    /// Creates a hub whose subscribers each buffer up to `buffer` snapshots.
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                registry: Mutex::new(Registry::default()),
                buffer: buffer.max(1),
                next_id: AtomicU64::new(1),
                dropped_total: AtomicU64::new(0),
            }),
        }
    }

    /// Registers a new subscriber. After `close` the returned subscription is
    /// already finished.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut registry = self.inner.registry();
        if registry.closed {
            drop(tx);
        } else {
            registry.subscribers.push(SubscriberHandle { id, sender: tx });
            debug!(subscriber = id, total = registry.subscribers.len(), "Subscriber registered");
        }

        Subscription {
            id,
            receiver: rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// # Publish
    ///
    /// Offers `snapshot` to every registered subscriber without waiting on
    /// any of them.
    pub fn publish(&self, snapshot: PollSnapshot) -> PublishReport {
        let mut report = PublishReport::default();
        let mut registry = self.inner.registry();
        if registry.closed {
            return report;
        }

        match registry.last_revision.get(&snapshot.id) {
            Some(last) if *last >= snapshot.revision => {
                debug!(
                    poll = %snapshot.id,
                    revision = snapshot.revision,
                    last = *last,
                    "Discarding stale snapshot"
                );
                report.stale = true;
                return report;
            }
            _ => {}
        }
        registry
            .last_revision
            .insert(snapshot.id.clone(), snapshot.revision);

        let frame = Arc::new(snapshot);
        registry.subscribers.retain(|sub| match sub.sender.try_send(Arc::clone(&frame)) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                report.dropped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                report.removed += 1;
                debug!(subscriber = sub.id, "Subscriber gone, removing");
                false
            }
        });

        if report.dropped > 0 {
            self.inner
                .dropped_total
                .fetch_add(report.dropped as u64, Ordering::Relaxed);
            warn!(
                poll = %frame.id,
                revision = frame.revision,
                dropped = report.dropped,
                "Slow subscribers missed a snapshot"
            );
        }
        report
    }

    /// Retires a deleted poll. A snapshot of it that is still on its way to
    /// the hub is discarded as stale.
    pub fn retire(&self, poll_id: &str) {
        self.inner
            .registry()
            .last_revision
            .insert(poll_id.to_string(), u64::MAX);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry().subscribers.len()
    }

    /// Total snapshots lost to full subscriber queues since start.
    pub fn dropped_total(&self) -> u64 {
        self.inner.dropped_total.load(Ordering::Relaxed)
    }

    /// Ends every subscription and refuses new ones.
    pub fn close(&self) {
        let mut registry = self.inner.registry();
        registry.closed = true;
        let count = registry.subscribers.len();
        registry.subscribers.clear();
        registry.last_revision.clear();
        info!(subscribers = count, "Broadcast hub closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.registry().closed
    }
}

/// # Subscription
///
/// Receiving end of one subscriber. Dropping it unregisters the subscriber.
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<Arc<PollSnapshot>>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next snapshot, or `None` once the hub is closed and the queue drained.
    pub async fn recv(&mut self) -> Option<Arc<PollSnapshot>> {
        self.receiver.recv().await
    }

    /// Next already-queued snapshot, if any.
    pub fn try_recv(&mut self) -> Option<Arc<PollSnapshot>> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            let mut registry = hub.registry();
            registry.subscribers.retain(|s| s.id != self.id);
        }
    }
}
