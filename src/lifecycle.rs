use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::config::{ExpiredPolicy, LifecycleSettings};
use crate::db::{PollStore, StoreError};
use crate::model::*;
use crate::notify::Notifier;
use crate::render;
use crate::schedule::ClosureScheduler;
use crate::tally::Tally;
use crate::vote::{self, VoteError, VoteEvent};

#[derive(Debug)]
pub enum CreatePollError {
    ChannelNotConfigured,
    ChannelBusy(PollId),
    ChannelUnavailable(String),
    Unexpected,
}

#[derive(Debug)]
pub enum ClosePollError {
    NotFound,
    Unexpected,
}

#[derive(Debug)]
pub enum DeletePollError {
    NotFound,
    StillActive,
    Unexpected,
}

impl From<StoreError> for DeletePollError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => Self::NotFound,
            e => {
                log_store_error(&e);
                Self::Unexpected
            }
        }
    }
}

#[derive(Debug)]
pub enum PurgeError {
    InvalidWindow,
    Unexpected,
}

impl From<StoreError> for PurgeError {
    fn from(e: StoreError) -> Self {
        log_store_error(&e);
        Self::Unexpected
    }
}

fn log_store_error(e: &StoreError) {
    error!("unexpected store error: {}", e);
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub restored: usize,
    pub expired: usize,
}

/// Active polls by id, plus the end times of polls that ended while this
/// process was running or were found expired on reload.
pub struct Registry {
    polls: HashMap<PollId, Poll>,
    ended: HashMap<PollId, Timestamp>,
    last_id: Option<PollId>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            polls: HashMap::new(),
            ended: HashMap::new(),
            last_id: None,
        }
    }

    pub fn get(&self, id: PollId) -> Option<&Poll> {
        self.polls.get(&id)
    }

    pub fn len(&self) -> usize {
        self.polls.len()
    }

    pub fn is_ended(&self, id: PollId) -> bool {
        self.ended.contains_key(&id)
    }

    /// Ids follow the creation clock but never repeat or go backwards.
    fn next_id(&mut self, now: Timestamp) -> PollId {
        let candidate = PollId::from_instant(now);
        let id = match self.last_id {
            Some(last) if candidate <= last => last.next(),
            _ => candidate,
        };
        self.last_id = Some(id);
        id
    }

    fn observe_id(&mut self, id: PollId) {
        if self.last_id.map_or(true, |last| id > last) {
            self.last_id = Some(id);
        }
    }

    fn insert(&mut self, poll: Poll) {
        self.observe_id(poll.id);
        self.polls.insert(poll.id, poll);
    }

    fn end(&mut self, id: PollId) -> Option<Poll> {
        let poll = self.polls.remove(&id)?;
        self.ended.insert(id, poll.end_time);
        Some(poll)
    }

    fn remember_ended(&mut self, poll: &Poll) {
        self.observe_id(poll.id);
        self.ended.insert(poll.id, poll.end_time);
    }

    fn forget_ended(&mut self, id: PollId) {
        self.ended.remove(&id);
    }

    fn forget_ended_before(&mut self, before: Timestamp) {
        self.ended.retain(|_, end_time| *end_time >= before);
    }

    fn active_in_channel(&self, channel_id: &str) -> Option<PollId> {
        self.polls.values()
            .filter(|p| p.channel_id == channel_id)
            .map(|p| p.id)
            .min()
    }
}

/// Owns every active poll. All mutation goes through `&mut self`, so a
/// single task holding the manager serializes votes and closures.
pub struct PollManager {
    registry: Registry,
    scheduler: ClosureScheduler,
    store: Arc<dyn PollStore>,
    notifier: Arc<dyn Notifier>,
    settings: LifecycleSettings,
}

impl PollManager {
    pub fn new(
        store: Arc<dyn PollStore>,
        notifier: Arc<dyn Notifier>,
        settings: LifecycleSettings,
        scheduler: ClosureScheduler,
    ) -> PollManager {
        PollManager {
            registry: Registry::new(),
            scheduler,
            store,
            notifier,
            settings,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn create_poll(&mut self, channel_id: Option<&str>) -> Result<Poll, CreatePollError> {
        let channel_id = channel_id
            .map(str::to_owned)
            .or_else(|| self.settings.default_channel.clone())
            .ok_or(CreatePollError::ChannelNotConfigured)?;

        if self.settings.one_poll_per_channel {
            if let Some(existing) = self.registry.active_in_channel(&channel_id) {
                return Err(CreatePollError::ChannelBusy(existing));
            }
        }

        let now = Utc::now();
        let id = self.registry.next_id(now);
        let template = &self.settings.template;
        let mut poll = Poll {
            id,
            question: template.question.clone(),
            options: template.options.clone(),
            channel_id,
            message_id: None,
            multiple_choice: template.multiple_choice,
            created_at: now,
            end_time: now + template.duration,
            status: PollStatus::Active,
            votes: Votes::new(),
        };

        let announcement = render::poll_announcement(&poll, &Tally::of(&poll));
        let message_id = self.notifier
            .post_announcement(&poll.channel_id, &announcement)
            .await
            .map_err(|e| {
                error!("Failed to post poll {} to channel {}: {}", poll.id, poll.channel_id, e);
                CreatePollError::ChannelUnavailable(poll.channel_id.clone())
            })?;
        poll.message_id = Some(message_id);

        self.scheduler.schedule(poll.id, poll.end_time);
        self.persist(&poll).await;
        info!("Created poll {} in channel {}, ends at {}", poll.id, poll.channel_id, poll.end_time);
        self.registry.insert(poll.clone());
        Ok(poll)
    }

    /// Applies a vote. Whether the poll is still open is decided by the
    /// server clock; the event's own timestamp can only make a vote late.
    pub async fn apply_vote(&mut self, event: &VoteEvent) -> Result<VoteResponse, VoteError> {
        if self.registry.get(event.poll_id).is_none() {
            return Err(match self.known_status(event.poll_id).await {
                Ok(Some(PollStatus::Ended)) => VoteError::PollClosed,
                Ok(Some(PollStatus::Active)) => {
                    warn!("Vote for poll {} which is active in the store but not loaded", event.poll_id);
                    VoteError::PollNotFound
                }
                Ok(None) => VoteError::PollNotFound,
                Err(e) => {
                    log_store_error(&e);
                    VoteError::Unexpected
                }
            });
        }

        let now = Utc::now();
        let poll = self.registry.polls
            .get_mut(&event.poll_id)
            .ok_or(VoteError::PollNotFound)?;
        if !poll.is_open_at(now) {
            info!("Vote on poll {} arrived after its end time, closing it", event.poll_id);
            self.close_poll(event.poll_id).await;
            return Err(VoteError::PollClosed);
        }

        let result = vote::apply_vote(poll, &event.user_id, event.option_index, event.timestamp)
            .map(|outcome| (outcome, poll.clone()));
        let (outcome, snapshot) = match result {
            Ok(applied) => applied,
            Err(e) => {
                debug!("Rejected vote poll_id={},user_id={}: {:?}", event.poll_id, event.user_id, e);
                return Err(e);
            }
        };

        debug!("Vote poll_id={},user_id={},option={}: {:?}",
            event.poll_id, event.user_id, event.option_index, outcome.change);
        self.refresh_announcement(&snapshot).await;
        self.persist(&snapshot).await;

        let feedback = outcome.feedback(&snapshot);
        if self.settings.voter_feedback {
            if let Err(e) = self.notifier.notify_voter(&event.user_id, &feedback).await {
                warn!("Failed to send vote feedback to {}: {}", event.user_id, e);
            }
        }
        Ok(VoteResponse { feedback })
    }

    /// Ends `id` if it is still active. Returns whether this call ended it;
    /// a poll is announced at most once.
    pub async fn close_poll(&mut self, id: PollId) -> bool {
        let mut poll = match self.registry.end(id) {
            Some(poll) => poll,
            None => return false,
        };
        self.scheduler.cancel(id);
        poll.status = PollStatus::Ended;

        let tally = Tally::of(&poll);
        let results = render::results_announcement(&poll, &tally);
        if let Err(e) = self.notifier.post_results(&poll.channel_id, &results).await {
            error!("Failed to post results of poll {}: {}", id, e);
        }
        if let Some(message_id) = &poll.message_id {
            let closed = render::closed_announcement(&poll, &tally);
            if let Err(e) = self.notifier.edit_announcement(&poll.channel_id, message_id, &closed).await {
                warn!("Failed to mark poll {} message as ended: {}", id, e);
            }
        }
        self.store_ended(id).await;

        info!("Poll {} ended with {} participants", id, tally.total_voters);
        true
    }

    pub async fn force_close(&mut self, id: PollId) -> Result<(), ClosePollError> {
        if self.close_poll(id).await {
            return Ok(());
        }
        match self.known_status(id).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(ClosePollError::NotFound),
            Err(e) => {
                log_store_error(&e);
                Err(ClosePollError::Unexpected)
            }
        }
    }

    /// Status of `id` from the registry, falling back to the store for
    /// polls ended by an earlier run.
    async fn known_status(&self, id: PollId) -> Result<Option<PollStatus>, StoreError> {
        if self.registry.is_ended(id) {
            return Ok(Some(PollStatus::Ended));
        }
        if self.registry.get(id).is_some() {
            return Ok(Some(PollStatus::Active));
        }
        self.store.poll_status(id).await
    }

    /// Restores active polls from the store. Polls already past their end
    /// time are ended according to the expired policy.
    pub async fn reload(&mut self) -> Result<ReloadSummary, StoreError> {
        let now = Utc::now();
        let mut summary = ReloadSummary::default();

        for mut poll in self.store.load_active_polls().await? {
            let pruned = poll.votes.prune(poll.options.len());
            if pruned > 0 {
                warn!("Dropped {} invalid votes from poll {}", pruned, poll.id);
            }

            if poll.is_open_at(now) {
                self.scheduler.schedule(poll.id, poll.end_time);
                if pruned > 0 {
                    self.persist(&poll).await;
                }
                self.registry.insert(poll);
                summary.restored += 1;
                continue;
            }

            summary.expired += 1;
            match self.settings.expired_policy {
                ExpiredPolicy::Silent => {
                    info!("Poll {} expired while offline, ending it silently", poll.id);
                    self.registry.remember_ended(&poll);
                    self.store_ended(poll.id).await;
                }
                ExpiredPolicy::Announce => {
                    let id = poll.id;
                    self.registry.insert(poll);
                    self.close_poll(id).await;
                }
            }
        }

        info!("Restored {} active polls, ended {} expired", summary.restored, summary.expired);
        Ok(summary)
    }

    pub fn list_active(&self) -> Vec<PollSummary> {
        let mut polls: Vec<PollSummary> = self.registry.polls.values().map(Poll::summary).collect();
        polls.sort_by_key(|p| p.id);
        polls
    }

    /// Removes an ended poll from the store.
    pub async fn delete_poll(&mut self, id: PollId) -> Result<(), DeletePollError> {
        if self.registry.get(id).is_some() {
            return Err(DeletePollError::StillActive);
        }
        self.store.delete_poll(id).await?;
        self.registry.forget_ended(id);
        info!("Deleted poll {}", id);
        Ok(())
    }

    pub async fn purge_ended(&mut self, older_than: Duration) -> Result<u64, PurgeError> {
        if older_than < Duration::zero() {
            return Err(PurgeError::InvalidWindow);
        }
        let before = Utc::now()
            .checked_sub_signed(older_than)
            .ok_or(PurgeError::InvalidWindow)?;
        let purged = self.store.purge_ended(before).await?;
        self.registry.forget_ended_before(before);
        info!("Purged {} ended polls", purged);
        Ok(purged)
    }

    async fn refresh_announcement(&self, poll: &Poll) {
        let message_id = match &poll.message_id {
            Some(message_id) => message_id,
            None => return,
        };
        let announcement = render::poll_announcement(poll, &Tally::of(poll));
        if let Err(e) = self.notifier.edit_announcement(&poll.channel_id, message_id, &announcement).await {
            warn!("Failed to update message of poll {}: {}", poll.id, e);
        }
    }

    async fn persist(&self, poll: &Poll) {
        if let Err(e) = self.store.save_poll(poll).await {
            error!("Failed to save poll {}: {}", poll.id, e);
        }
    }

    async fn store_ended(&self, id: PollId) {
        match self.store.mark_ended(id).await {
            Ok(()) => (),
            Err(StoreError::NotFound(_)) => warn!("Ended poll {} was never stored", id),
            Err(e) => error!("Failed to mark poll {} ended: {}", id, e),
        }
    }
}
