use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::model::{Poll, PollId, PollStatus, Timestamp};
use super::{PollStore, StoreError};

pub const FILE_ENV_KEY: &str = "POLLBOT_POLLS_FILE";
pub const DEFAULT_POLLS_FILE: &str = "active_polls.json";

/// Keeps every poll in one JSON array, sorted by id. Writes go to a
/// sibling temp file that is renamed over the original.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> JsonFileStore {
        JsonFileStore {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<Vec<Poll>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, mut polls: Vec<Poll>) -> Result<(), StoreError> {
        polls.sort_by_key(|p| p.id);
        let bytes = serde_json::to_vec_pretty(&polls)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Saved {} polls to {}", polls.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl PollStore for JsonFileStore {
    async fn save_poll(&self, poll: &Poll) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut polls = self.read_all().await?;
        match polls.iter_mut().find(|p| p.id == poll.id) {
            Some(existing) => *existing = poll.clone(),
            None => polls.push(poll.clone()),
        }
        self.write_all(polls).await
    }

    async fn load_active_polls(&self) -> Result<Vec<Poll>, StoreError> {
        let _guard = self.lock.lock().await;
        let polls = self.read_all().await?;
        Ok(polls.into_iter()
            .filter(|p| p.status == PollStatus::Active)
            .collect())
    }

    async fn poll_status(&self, id: PollId) -> Result<Option<PollStatus>, StoreError> {
        let _guard = self.lock.lock().await;
        let polls = self.read_all().await?;
        Ok(polls.iter().find(|p| p.id == id).map(|p| p.status))
    }

    async fn mark_ended(&self, id: PollId) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut polls = self.read_all().await?;
        let poll = polls.iter_mut()
            .find(|p| p.id == id)
            .ok_or(StoreError::NotFound(id))?;
        poll.status = PollStatus::Ended;
        self.write_all(polls).await
    }

    async fn delete_poll(&self, id: PollId) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut polls = self.read_all().await?;
        let before = polls.len();
        polls.retain(|p| p.id != id);
        if polls.len() == before {
            return Err(StoreError::NotFound(id));
        }
        self.write_all(polls).await
    }

    async fn purge_ended(&self, before: Timestamp) -> Result<u64, StoreError> {
        let _guard = self.lock.lock().await;
        let mut polls = self.read_all().await?;
        let count = polls.len();
        polls.retain(|p| !(p.status == PollStatus::Ended && p.end_time < before));
        let purged = (count - polls.len()) as u64;
        if purged > 0 {
            self.write_all(polls).await?;
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use crate::model::{PollId, Selection, test_polls::new_mock_poll};
    use crate::tally::Tally;
    use super::*;

    fn new_store() -> (tempfile::TempDir, JsonFileStore) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = JsonFileStore::new(dir.path().join(DEFAULT_POLLS_FILE));
        (dir, store)
    }

    #[tokio::test]
    async fn missing_file_is_empty() {
        let (_dir, store) = new_store();
        let polls = store.load_active_polls().await.expect("load should succeed");
        assert!(polls.is_empty());
    }

    #[tokio::test]
    async fn reload_reproduces_tally() {
        let (_dir, store) = new_store();

        let mut multi = new_mock_poll(true);
        multi.votes.set("u1", Selection::Multiple([0, 2].into_iter().collect()));
        multi.votes.set("u2", Selection::Multiple([1].into_iter().collect()));

        let mut single = new_mock_poll(false);
        single.id = multi.id.next();
        single.votes.set("u1", Selection::Single(0));
        single.votes.set("u2", Selection::Single(1));

        store.save_poll(&multi).await.expect("save should succeed");
        store.save_poll(&single).await.expect("save should succeed");

        let loaded = store.load_active_polls().await.expect("load should succeed");
        assert_eq!(vec![multi.clone(), single.clone()], loaded);
        assert_eq!(Tally::of(&multi), Tally::of(&loaded[0]));
        assert_eq!(Tally::of(&single), Tally::of(&loaded[1]));
    }

    #[tokio::test]
    async fn save_replaces_existing_poll() {
        let (_dir, store) = new_store();
        let mut poll = new_mock_poll(false);
        store.save_poll(&poll).await.unwrap();

        poll.votes.set("u1", Selection::Single(3));
        store.save_poll(&poll).await.unwrap();

        let loaded = store.load_active_polls().await.unwrap();
        assert_eq!(1, loaded.len());
        assert_eq!(Some(&Selection::Single(3)), loaded[0].votes.get("u1"));
    }

    #[tokio::test]
    async fn ended_polls_are_kept_until_purged() {
        let (_dir, store) = new_store();
        let poll = new_mock_poll(true);
        store.save_poll(&poll).await.unwrap();

        store.mark_ended(poll.id).await.expect("mark ended should succeed");
        assert!(store.load_active_polls().await.unwrap().is_empty());
        assert_eq!(Some(PollStatus::Ended), store.poll_status(poll.id).await.unwrap());

        let purged = store.purge_ended(poll.end_time).await.unwrap();
        assert_eq!(0, purged);
        let purged = store.purge_ended(poll.end_time + Duration::days(1)).await.unwrap();
        assert_eq!(1, purged);

        match store.delete_poll(poll.id).await {
            Err(StoreError::NotFound(id)) => assert_eq!(poll.id, id),
            other => panic!("Expected NotFound {:?}", other),
        }
        assert_eq!(None, store.poll_status(poll.id).await.unwrap());
    }

    #[tokio::test]
    async fn mark_ended_unknown_poll() {
        let (_dir, store) = new_store();
        let error = store.mark_ended(PollId(42))
            .await
            .expect_err("unknown poll should not be marked");
        assert!(matches!(error, StoreError::NotFound(PollId(42))));
    }
}
