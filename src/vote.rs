use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::{Poll, PollId, PutVoteRequest, Selection, Timestamp};

/// A button click, as handed over by the gateway adapter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoteEvent {
    pub poll_id: PollId,
    pub user_id: String,
    pub option_index: usize,
    pub timestamp: Timestamp,
}

#[derive(Debug, PartialEq, Eq)]
pub enum VoteError {
    InvalidOption(i64),
    PollNotFound,
    PollClosed,
    Unexpected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteChange {
    Added,
    Removed,
    Replaced { previous: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOutcome {
    pub option_index: usize,
    pub change: VoteChange,
}

impl VoteOutcome {
    pub fn feedback(&self, poll: &Poll) -> String {
        let option = poll.options.get(self.option_index)
            .map(|o| o.to_string())
            .unwrap_or_default();
        match self.change {
            VoteChange::Added => format!("Added your vote for {}", option),
            VoteChange::Removed => format!("Removed your vote for {}", option),
            VoteChange::Replaced { .. } => format!("Changed your vote to {}", option),
        }
    }
}

impl VoteEvent {
    /// Builds an event from the wire form. Negative indices never name an
    /// option; the upper bound is checked against the poll itself.
    pub fn from_request(poll_id: PollId, request: PutVoteRequest, received_at: Timestamp)
    -> Result<VoteEvent, VoteError> {
        let option_index = usize::try_from(request.option_index)
            .map_err(|_| VoteError::InvalidOption(request.option_index))?;
        Ok(VoteEvent {
            poll_id,
            user_id: request.user_id,
            option_index,
            timestamp: request.timestamp.unwrap_or(received_at),
        })
    }
}

/// Toggles `user_id`'s vote for `option_index`.
///
/// Single choice: picking the current option retracts it, anything else
/// replaces it. Multiple choice: the option is flipped in the user's set and
/// the user is dropped once the set is empty. Applying the same event twice
/// toggles twice.
pub fn apply_vote(poll: &mut Poll, user_id: &str, option_index: usize, at: Timestamp)
-> Result<VoteOutcome, VoteError> {
    if !poll.is_open_at(at) {
        return Err(VoteError::PollClosed);
    }
    if option_index >= poll.options.len() {
        return Err(VoteError::InvalidOption(option_index as i64));
    }

    let change = if poll.multiple_choice {
        toggle_multiple(poll, user_id, option_index)
    } else {
        toggle_single(poll, user_id, option_index)
    };

    Ok(VoteOutcome { option_index, change })
}

fn toggle_single(poll: &mut Poll, user_id: &str, option_index: usize) -> VoteChange {
    match poll.votes.get(user_id).cloned() {
        Some(Selection::Single(current)) if current == option_index => {
            poll.votes.remove(user_id);
            VoteChange::Removed
        }
        Some(Selection::Single(previous)) => {
            poll.votes.set(user_id, Selection::Single(option_index));
            VoteChange::Replaced { previous }
        }
        // A set stored against a single-choice poll is treated as no vote.
        Some(Selection::Multiple(_)) | None => {
            poll.votes.set(user_id, Selection::Single(option_index));
            VoteChange::Added
        }
    }
}

fn toggle_multiple(poll: &mut Poll, user_id: &str, option_index: usize) -> VoteChange {
    let mut set = match poll.votes.get(user_id) {
        Some(Selection::Multiple(set)) => set.clone(),
        Some(Selection::Single(i)) => BTreeSet::from([*i]),
        None => BTreeSet::new(),
    };

    let change = if set.remove(&option_index) {
        VoteChange::Removed
    } else {
        set.insert(option_index);
        VoteChange::Added
    };

    if set.is_empty() {
        poll.votes.remove(user_id);
    } else {
        poll.votes.set(user_id, Selection::Multiple(set));
    }
    change
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rand::{thread_rng, Rng};

    use crate::model::{PollStatus, test_polls::new_mock_poll};
    use super::*;

    fn during(poll: &Poll) -> Timestamp {
        poll.created_at + Duration::minutes(5)
    }

    #[test]
    fn single_choice_change_of_mind() {
        let mut poll = new_mock_poll(false);
        let at = during(&poll);

        let first = apply_vote(&mut poll, "u", 0, at).expect("vote should apply");
        assert_eq!(VoteChange::Added, first.change);

        let second = apply_vote(&mut poll, "u", 1, at).expect("vote should apply");
        assert_eq!(VoteChange::Replaced { previous: 0 }, second.change);
        assert_eq!(1, poll.votes.len());
        assert_eq!(Some(&Selection::Single(1)), poll.votes.get("u"));

        let third = apply_vote(&mut poll, "u", 1, at).expect("vote should apply");
        assert_eq!(VoteChange::Removed, third.change);
        assert!(poll.votes.is_empty());
    }

    #[test]
    fn multiple_choice_toggle_twice_restores_state() {
        let mut poll = new_mock_poll(true);
        let at = during(&poll);
        apply_vote(&mut poll, "other", 3, at).unwrap();
        apply_vote(&mut poll, "u", 2, at).unwrap();
        let before = poll.votes.clone();

        let added = apply_vote(&mut poll, "u", 5, at).unwrap();
        let removed = apply_vote(&mut poll, "u", 5, at).unwrap();

        assert_eq!(VoteChange::Added, added.change);
        assert_eq!(VoteChange::Removed, removed.change);
        assert_eq!(before, poll.votes);
    }

    #[test]
    fn removing_last_option_drops_voter() {
        let mut poll = new_mock_poll(true);
        let at = during(&poll);
        apply_vote(&mut poll, "u", 4, at).unwrap();
        apply_vote(&mut poll, "u", 4, at).unwrap();

        assert!(poll.votes.get("u").is_none());
    }

    #[test]
    fn rejects_out_of_range_option() {
        let mut poll = new_mock_poll(true);
        let at = during(&poll);

        let error = apply_vote(&mut poll, "u", 8, at).expect_err("index 8 is out of range");
        assert_eq!(VoteError::InvalidOption(8), error);
        assert!(poll.votes.is_empty());
    }

    #[test]
    fn event_from_request() {
        let poll = new_mock_poll(true);
        let received_at = during(&poll);
        let request = PutVoteRequest { user_id: "u".to_owned(), option_index: -1, timestamp: None };
        assert_eq!(
            Err(VoteError::InvalidOption(-1)),
            VoteEvent::from_request(poll.id, request, received_at)
        );

        let request = PutVoteRequest { user_id: "u".to_owned(), option_index: 7, timestamp: None };
        let event = VoteEvent::from_request(poll.id, request, received_at).expect("index 7 is valid");
        assert_eq!(7, event.option_index);
        assert_eq!(received_at, event.timestamp);
    }

    #[test]
    fn rejects_votes_after_close() {
        let mut poll = new_mock_poll(false);
        let late = poll.end_time;
        assert_eq!(Err(VoteError::PollClosed), apply_vote(&mut poll, "u", 0, late));

        let mut ended = new_mock_poll(false);
        ended.status = PollStatus::Ended;
        let at = during(&ended);
        assert_eq!(Err(VoteError::PollClosed), apply_vote(&mut ended, "u", 0, at));
    }

    #[test]
    fn feedback_names_the_option() {
        let mut poll = new_mock_poll(true);
        let at = during(&poll);
        let outcome = apply_vote(&mut poll, "u", 1, at).unwrap();
        assert_eq!("Added your vote for 2️⃣ Tuesday", outcome.feedback(&poll));
    }

    #[test]
    fn random_toggles_never_leave_empty_selections() {
        let mut rng = thread_rng();
        for multiple_choice in [true, false] {
            let mut poll = new_mock_poll(multiple_choice);
            let at = during(&poll);
            let option_count = poll.options.len();

            for _ in 0..500 {
                let user = format!("user{}", rng.gen_range(0..6));
                let index = rng.gen_range(0..option_count);
                apply_vote(&mut poll, &user, index, at).unwrap();

                for (_, selection) in poll.votes.iter() {
                    assert!(!selection.is_empty());
                    assert!(selection.indices().all(|i| i < option_count));
                    match selection {
                        Selection::Multiple(_) => assert!(multiple_choice),
                        Selection::Single(_) => assert!(!multiple_choice),
                    }
                }
            }
        }
    }
}
