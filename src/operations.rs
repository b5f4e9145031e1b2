use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::lifecycle::{ClosePollError, CreatePollError, DeletePollError, PollManager, PurgeError};
use crate::model::*;
use crate::schedule::WeeklySchedule;
use crate::vote::{VoteError, VoteEvent};

#[cfg(test)]
use mockall::automock;

const COMMAND_BUFFER: usize = 64;

#[derive(Debug)]
pub enum ListPollsError {
    Unexpected,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PollOperationsT {
    async fn create_poll(&self, request: &CreatePollRequest) -> Result<PollSummary, CreatePollError>;
    async fn list_active(&self) -> Result<Vec<PollSummary>, ListPollsError>;
    async fn vote(&self, event: VoteEvent) -> Result<VoteResponse, VoteError>;
    async fn close_poll(&self, id: PollId) -> Result<(), ClosePollError>;
    async fn delete_poll(&self, id: PollId) -> Result<(), DeletePollError>;
    async fn purge_ended(&self, request: &PurgeRequest) -> Result<PurgeResponse, PurgeError>;
}

enum Command {
    Create {
        channel_id: Option<String>,
        reply: oneshot::Sender<Result<PollSummary, CreatePollError>>,
    },
    List {
        reply: oneshot::Sender<Vec<PollSummary>>,
    },
    Vote {
        event: VoteEvent,
        reply: oneshot::Sender<Result<VoteResponse, VoteError>>,
    },
    Close {
        id: PollId,
        reply: oneshot::Sender<Result<(), ClosePollError>>,
    },
    Delete {
        id: PollId,
        reply: oneshot::Sender<Result<(), DeletePollError>>,
    },
    Purge {
        older_than: Duration,
        reply: oneshot::Sender<Result<u64, PurgeError>>,
    },
}

/// Handle to the task that owns the [`PollManager`]. Cloning is cheap and
/// every clone talks to the same manager.
#[derive(Clone)]
pub struct PollOperations {
    commands: mpsc::Sender<Command>,
}

impl PollOperations {
    /// Moves the manager onto its own task. `triggers` carries poll ids
    /// whose closure timers fired.
    pub fn spawn(manager: PollManager, triggers: mpsc::UnboundedReceiver<PollId>)
    -> (PollOperations, JoinHandle<()>) {
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let handle = tokio::spawn(run(manager, receiver, triggers));
        (PollOperations { commands }, handle)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply, response) = oneshot::channel();
        if self.commands.send(command(reply)).await.is_err() {
            error!("Poll manager is not running");
            return None;
        }
        response.await.ok()
    }
}

async fn run(
    mut manager: PollManager,
    mut commands: mpsc::Receiver<Command>,
    mut triggers: mpsc::UnboundedReceiver<PollId>,
) {
    loop {
        tokio::select! {
            biased;
            Some(id) = triggers.recv() => {
                manager.close_poll(id).await;
            }
            Some(command) = commands.recv() => dispatch(&mut manager, command).await,
            else => break,
        }
    }
    info!("Poll manager stopped");
}

async fn dispatch(manager: &mut PollManager, command: Command) {
    // A dropped reply receiver means the caller gave up; nothing to do.
    match command {
        Command::Create { channel_id, reply } => {
            let created = manager.create_poll(channel_id.as_deref()).await;
            let _ = reply.send(created.map(|poll| poll.summary()));
        }
        Command::List { reply } => {
            let _ = reply.send(manager.list_active());
        }
        Command::Vote { event, reply } => {
            let _ = reply.send(manager.apply_vote(&event).await);
        }
        Command::Close { id, reply } => {
            let _ = reply.send(manager.force_close(id).await);
        }
        Command::Delete { id, reply } => {
            let _ = reply.send(manager.delete_poll(id).await);
        }
        Command::Purge { older_than, reply } => {
            let _ = reply.send(manager.purge_ended(older_than).await);
        }
    }
}

#[async_trait]
impl PollOperationsT for PollOperations {
    async fn create_poll(&self, request: &CreatePollRequest) -> Result<PollSummary, CreatePollError> {
        let channel_id = request.channel_id.clone();
        self.request(|reply| Command::Create { channel_id, reply })
            .await
            .unwrap_or(Err(CreatePollError::Unexpected))
    }

    async fn list_active(&self) -> Result<Vec<PollSummary>, ListPollsError> {
        self.request(|reply| Command::List { reply })
            .await
            .ok_or(ListPollsError::Unexpected)
    }

    async fn vote(&self, event: VoteEvent) -> Result<VoteResponse, VoteError> {
        self.request(|reply| Command::Vote { event, reply })
            .await
            .unwrap_or(Err(VoteError::Unexpected))
    }

    async fn close_poll(&self, id: PollId) -> Result<(), ClosePollError> {
        self.request(|reply| Command::Close { id, reply })
            .await
            .unwrap_or(Err(ClosePollError::Unexpected))
    }

    async fn delete_poll(&self, id: PollId) -> Result<(), DeletePollError> {
        self.request(|reply| Command::Delete { id, reply })
            .await
            .unwrap_or(Err(DeletePollError::Unexpected))
    }

    async fn purge_ended(&self, request: &PurgeRequest) -> Result<PurgeResponse, PurgeError> {
        let older_than = Duration::try_days(request.older_than_days)
            .filter(|window| *window >= Duration::zero())
            .ok_or(PurgeError::InvalidWindow)?;
        let purged = self.request(|reply| Command::Purge { older_than, reply })
            .await
            .unwrap_or(Err(PurgeError::Unexpected))?;
        Ok(PurgeResponse { purged })
    }
}

/// Creates a poll in the default channel at every occurrence of `schedule`.
pub fn spawn_weekly_polls<A>(ops: A, schedule: WeeklySchedule) -> JoinHandle<()>
    where A: PollOperationsT + Send + Sync + 'static
{
    tokio::spawn(async move {
        loop {
            let next = schedule.next_after(Utc::now());
            info!("Next scheduled poll at {}", next);
            tokio::time::sleep((next - Utc::now()).to_std().unwrap_or_default()).await;

            match ops.create_poll(&CreatePollRequest::default()).await {
                Ok(poll) => info!("Scheduled poll {} created", poll.id),
                Err(e) => error!("Scheduled poll creation failed: {:?}", e),
            }
        }
    })
}
