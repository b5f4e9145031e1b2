pub mod file;
mod transaction;

pub use file::JsonFileStore;
pub use transaction::*;

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use itertools::Itertools;
use sqlx::PgPool;

use crate::model::{Poll, PollId, PollOption, PollStatus, Selection, Timestamp, Votes};

#[cfg(test)]
use mockall::automock;

pub const ENV_KEY: &str = "POLLBOT_DB_URL";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed poll document: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("poll {0} not found in store")]
    NotFound(PollId),
    #[error("corrupt poll record: {0}")]
    Corrupt(String),
}

/// Durable home of polls, keyed by poll id.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PollStore: Send + Sync {
    /// Inserts or replaces the poll with the same id.
    async fn save_poll(&self, poll: &Poll) -> Result<(), StoreError>;
    async fn load_active_polls(&self) -> Result<Vec<Poll>, StoreError>;
    /// Status of any stored poll, active or ended.
    async fn poll_status(&self, id: PollId) -> Result<Option<PollStatus>, StoreError>;
    async fn mark_ended(&self, id: PollId) -> Result<(), StoreError>;
    async fn delete_poll(&self, id: PollId) -> Result<(), StoreError>;
    /// Deletes ended polls whose end time is before `before`.
    async fn purge_ended(&self, before: Timestamp) -> Result<u64, StoreError>;
}

#[derive(Clone)]
pub struct PollDb {
    pool: PgPool
}

impl PollDb {
    pub fn new(db_pool: PgPool) -> PollDb {
        PollDb{ pool: db_pool }
    }

    pub async fn new_transaction(&self) -> Result<PollTransaction, sqlx::Error> {
        PollTransaction::new(&self.pool).await
    }
}

#[async_trait]
impl PollStore for PollDb {
    async fn save_poll(&self, poll: &Poll) -> Result<(), StoreError> {
        let mut tx = self.new_transaction().await?;

        tx.upsert_poll(&PollRow::from(poll)).await?;
        for (position, option) in poll.options.iter().enumerate() {
            tx.insert_option(poll.id.0, position as i32, option).await?;
        }

        tx.delete_votes(poll.id.0).await?;
        for (seq, (user_id, selection)) in poll.votes.iter().enumerate() {
            for index in selection.indices() {
                let row = VoteRow {
                    poll_id: poll.id.0,
                    user_id: user_id.to_owned(),
                    option_index: index as i32,
                    seq: seq as i32,
                };
                tx.insert_vote(&row).await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_active_polls(&self) -> Result<Vec<Poll>, StoreError> {
        let mut tx = self.new_transaction().await?;

        let polls = tx.select_polls_by_status(PollStatus::Active).await?;
        let ids: Vec<i64> = polls.iter().map(|p| p.id).collect();

        let mut options_by_poll: HashMap<i64, Vec<OptionRow>> = tx.select_options(&ids)
            .await?
            .into_iter()
            .into_group_map_by(|o| o.poll_id);
        let mut votes_by_poll: HashMap<i64, Vec<VoteRow>> = tx.select_votes(&ids)
            .await?
            .into_iter()
            .into_group_map_by(|v| v.poll_id);

        tx.commit().await?;

        polls.into_iter()
            .map(|row| {
                let mut options = options_by_poll.remove(&row.id).unwrap_or_default();
                options.sort_by_key(|o| o.position);
                let votes = votes_by_poll.remove(&row.id).unwrap_or_default();
                row.into_poll(options, votes)
            })
            .collect()
    }

    async fn poll_status(&self, id: PollId) -> Result<Option<PollStatus>, StoreError> {
        let mut tx = self.new_transaction().await?;
        let status = tx.select_status(id.0).await?;
        tx.commit().await?;
        status.map(|s| PollStatus::parse(&s)
                .ok_or_else(|| StoreError::Corrupt(format!("poll {} has status {}", id, s))))
            .transpose()
    }

    async fn mark_ended(&self, id: PollId) -> Result<(), StoreError> {
        let mut tx = self.new_transaction().await?;
        let done = tx.update_status(id.0, PollStatus::Ended).await?;
        tx.commit().await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn delete_poll(&self, id: PollId) -> Result<(), StoreError> {
        let mut tx = self.new_transaction().await?;
        let done = tx.delete_poll(id.0).await?;
        tx.commit().await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn purge_ended(&self, before: Timestamp) -> Result<u64, StoreError> {
        let mut tx = self.new_transaction().await?;
        let done = tx.delete_ended_before(before).await?;
        tx.commit().await?;
        Ok(done.rows_affected())
    }
}

#[derive(sqlx::FromRow, Debug, Eq, PartialEq)]
pub struct PollRow {
    pub id: i64,
    pub question: String,
    pub channel_id: String,
    pub message_id: Option<String>,
    pub multiple_choice: bool,
    pub created_at: Timestamp,
    pub end_time: Timestamp,
    pub status: String,
}

#[derive(sqlx::FromRow, Debug, Eq, PartialEq)]
pub struct OptionRow {
    pub poll_id: i64,
    pub position: i32,
    pub glyph: String,
    pub label: String,
}

#[derive(sqlx::FromRow, Debug, Eq, PartialEq)]
#[cfg_attr(test, derive(Clone))]
pub struct VoteRow {
    pub poll_id: i64,
    pub user_id: String,
    pub option_index: i32,
    pub seq: i32,
}

impl From<&Poll> for PollRow {
    fn from(poll: &Poll) -> PollRow {
        PollRow {
            id: poll.id.0,
            question: poll.question.clone(),
            channel_id: poll.channel_id.clone(),
            message_id: poll.message_id.clone(),
            multiple_choice: poll.multiple_choice,
            created_at: poll.created_at,
            end_time: poll.end_time,
            status: poll.status.as_str().to_owned(),
        }
    }
}

impl PollRow {
    fn into_poll(self, options: Vec<OptionRow>, votes: Vec<VoteRow>) -> Result<Poll, StoreError> {
        let status = PollStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("poll {} has status {}", self.id, self.status)))?;
        Ok(Poll {
            id: PollId(self.id),
            question: self.question,
            options: options.into_iter()
                .map(|o| PollOption { glyph: o.glyph, label: o.label })
                .collect(),
            channel_id: self.channel_id,
            message_id: self.message_id,
            multiple_choice: self.multiple_choice,
            created_at: self.created_at,
            end_time: self.end_time,
            status,
            votes: votes_from_rows(votes, self.multiple_choice),
        })
    }
}

/// Rebuilds the vote map from rows ordered by `(seq, option_index)`.
fn votes_from_rows(rows: Vec<VoteRow>, multiple_choice: bool) -> Votes {
    let mut votes = Votes::new();
    for row in rows {
        let index = match usize::try_from(row.option_index) {
            Ok(index) => index,
            Err(_) => {
                warn!("Skipping negative option index poll_id={},user_id={}", row.poll_id, row.user_id);
                continue;
            }
        };
        if multiple_choice {
            let mut set = match votes.get(&row.user_id) {
                Some(Selection::Multiple(set)) => set.clone(),
                _ => BTreeSet::new(),
            };
            set.insert(index);
            votes.set(&row.user_id, Selection::Multiple(set));
        } else {
            votes.set(&row.user_id, Selection::Single(index));
        }
    }
    votes
}

#[cfg(test)]
pub mod test_db {
    use std::env;
    use sqlx::{Pool, Postgres};
    use sqlx::postgres::PgPoolOptions;
    const DATABASE_URL: &str = "POLLBOT_TEST_DB";

    pub async fn new_pool() -> Pool<Postgres> {
        let db_url = &env::var(DATABASE_URL)
            .unwrap_or_else(|_| panic!("env variable for {} must be set", DATABASE_URL));
        PgPoolOptions::new()
            .max_connections(1)
            .connect(db_url)
            .await
            .expect("Failed to connect to the database")
    }
}
