use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::core::poll::Poll;
use crate::error::StoreError;
use crate::store::PollStore;

/// Keeps every poll in a process-local map. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryPollStore {
    polls: RwLock<HashMap<String, Poll>>,
}

impl MemoryPollStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.polls.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.polls.read().await.is_empty()
    }
}

impl PollStore for MemoryPollStore {
    async fn get(&self, id: &str) -> Result<Poll, StoreError> {
        self.polls
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self) -> Result<Vec<Poll>, StoreError> {
        let mut polls: Vec<Poll> = self.polls.read().await.values().cloned().collect();
        polls.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(polls)
    }

    async fn insert(&self, poll: Poll) -> Result<(), StoreError> {
        let mut polls = self.polls.write().await;
        if polls.contains_key(&poll.id) {
            return Err(StoreError::Backend(format!("poll {} already exists", poll.id)));
        }
        polls.insert(poll.id.clone(), poll);
        Ok(())
    }

    async fn save(&self, poll: Poll) -> Result<(), StoreError> {
        match self.polls.write().await.get_mut(&poll.id) {
            Some(slot) => {
                *slot = poll;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.polls
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::poll::NewPoll;
    use chrono::{Duration, Utc};

    fn poll_created_at(offset_secs: i64) -> Poll {
        let now = Utc::now();
        NewPoll {
            question: format!("Q{offset_secs}"),
            options: vec!["a".into(), "b".into()],
            start_at: now,
            end_at: now + Duration::hours(1),
        }
        .into_poll("admin", now + Duration::seconds(offset_secs))
    }

    #[tokio::test]
    async fn test_crud_round() {
        let store = MemoryPollStore::new();
        let poll = poll_created_at(0);
        let id = poll.id.clone();

        store.insert(poll.clone()).await.unwrap();
        assert!(store.insert(poll.clone()).await.is_err());
        assert_eq!(store.get(&id).await.unwrap(), poll);

        let mut changed = poll.clone();
        changed.question = "changed".into();
        store.save(changed).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().question, "changed");

        store.delete(&id).await.unwrap();
        assert_eq!(store.get(&id).await, Err(StoreError::NotFound));
        assert_eq!(store.delete(&id).await, Err(StoreError::NotFound));
        assert_eq!(store.save(poll).await, Err(StoreError::NotFound));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let store = MemoryPollStore::new();
        for offset in [5, -10, 20, 0] {
            store.insert(poll_created_at(offset)).await.unwrap();
        }
        let questions: Vec<String> = store.list().await.unwrap().into_iter().map(|p| p.question).collect();
        assert_eq!(questions, vec!["Q20", "Q5", "Q0", "Q-10"]);
        assert_eq!(store.len().await, 4);
    }
}
