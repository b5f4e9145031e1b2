use std::collections::BTreeSet;
use std::fmt::{self, Display};

use chrono::{DateTime, offset::Utc};
use itertools::Either;
use serde::{Deserialize, Serialize};

pub type Timestamp = DateTime<Utc>;

/// Poll identifier derived from the creation instant in epoch millis.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct PollId(pub i64);

impl PollId {
    pub fn from_instant(at: Timestamp) -> PollId {
        PollId(at.timestamp_millis())
    }

    pub fn next(self) -> PollId {
        PollId(self.0 + 1)
    }
}

impl Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PollOption {
    pub glyph: String,
    pub label: String,
}

impl PollOption {
    /// Splits `"1️⃣ Monday"` into its glyph and label.
    pub fn parse(raw: &str) -> PollOption {
        let raw = raw.trim();
        match raw.split_once(' ') {
            Some((glyph, label)) => PollOption {
                glyph: glyph.to_owned(),
                label: label.trim().to_owned(),
            },
            None => PollOption {
                glyph: String::new(),
                label: raw.to_owned(),
            },
        }
    }
}

impl Display for PollOption {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.glyph.is_empty() {
            write!(f, "{}", self.label)
        } else {
            write!(f, "{} {}", self.glyph, self.label)
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Active,
    Ended,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Active => "active",
            PollStatus::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Option<PollStatus> {
        match s {
            "active" => Some(PollStatus::Active),
            "ended" => Some(PollStatus::Ended),
            _ => None,
        }
    }
}

/// A single user's current choice. Serialized as a bare index or an array
/// of indices so stored documents stay readable.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Selection {
    Single(usize),
    Multiple(BTreeSet<usize>),
}

impl Selection {
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        match self {
            Selection::Single(i) => Either::Left(std::iter::once(*i)),
            Selection::Multiple(set) => Either::Right(set.iter().copied()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Selection::Single(_) => false,
            Selection::Multiple(set) => set.is_empty(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoteEntry {
    pub user_id: String,
    pub selection: Selection,
}

/// User id to selection, kept in first-vote order.
///
/// Re-voting keeps a user's position; retracting and voting again moves
/// them to the back.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct Votes {
    entries: Vec<VoteEntry>,
}

impl Votes {
    pub fn new() -> Votes {
        Votes::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, user_id: &str) -> Option<&Selection> {
        self.entries
            .iter()
            .find(|e| e.user_id == user_id)
            .map(|e| &e.selection)
    }

    pub fn set(&mut self, user_id: &str, selection: Selection) {
        match self.entries.iter_mut().find(|e| e.user_id == user_id) {
            Some(entry) => entry.selection = selection,
            None => self.entries.push(VoteEntry {
                user_id: user_id.to_owned(),
                selection,
            }),
        }
    }

    pub fn remove(&mut self, user_id: &str) -> Option<Selection> {
        let position = self.entries.iter().position(|e| e.user_id == user_id)?;
        Some(self.entries.remove(position).selection)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Selection)> {
        self.entries.iter().map(|e| (e.user_id.as_str(), &e.selection))
    }

    /// Drops indices outside `0..option_count`, duplicate voters and voters
    /// left without a selection. Returns how many entries were changed or
    /// removed.
    pub fn prune(&mut self, option_count: usize) -> usize {
        let mut touched = 0;
        let mut seen = BTreeSet::new();
        self.entries.retain_mut(|entry| {
            if !seen.insert(entry.user_id.clone()) {
                touched += 1;
                return false;
            }
            match &mut entry.selection {
                Selection::Single(i) if *i >= option_count => {
                    touched += 1;
                    false
                }
                Selection::Single(_) => true,
                Selection::Multiple(set) => {
                    let before = set.len();
                    set.retain(|i| *i < option_count);
                    if set.len() != before || set.is_empty() {
                        touched += 1;
                    }
                    !set.is_empty()
                }
            }
        });
        touched
    }
}

impl FromIterator<(String, Selection)> for Votes {
    fn from_iter<I: IntoIterator<Item = (String, Selection)>>(iter: I) -> Votes {
        let mut votes = Votes::new();
        for (user_id, selection) in iter {
            votes.set(&user_id, selection);
        }
        votes
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    pub options: Vec<PollOption>,
    pub channel_id: String,
    pub message_id: Option<String>,
    pub multiple_choice: bool,
    pub created_at: Timestamp,
    pub end_time: Timestamp,
    pub status: PollStatus,
    #[serde(default)]
    pub votes: Votes,
}

impl Poll {
    pub fn is_open_at(&self, at: Timestamp) -> bool {
        self.status == PollStatus::Active && at < self.end_time
    }

    pub fn summary(&self) -> PollSummary {
        PollSummary {
            id: self.id,
            question: self.question.clone(),
            channel_id: self.channel_id.clone(),
            end_time: self.end_time,
            voters: self.votes.len(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub id: PollId,
    pub question: String,
    pub channel_id: String,
    pub end_time: Timestamp,
    pub voters: usize,
}

#[derive(Deserialize, Serialize, Default)]
#[cfg_attr(test, derive(Clone))]
pub struct CreatePollRequest {
    pub channel_id: Option<String>,
}

#[derive(Deserialize, Serialize)]
#[cfg_attr(test, derive(Clone))]
pub struct PutVoteRequest {
    pub user_id: String,
    pub option_index: i64,
    pub timestamp: Option<Timestamp>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct VoteResponse {
    pub feedback: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeRequest {
    pub older_than_days: i64,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct PurgeResponse {
    pub purged: u64,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_option() {
        let option = PollOption::parse("1️⃣ Monday");
        assert_eq!("1️⃣", option.glyph);
        assert_eq!("Monday", option.label);
        assert_eq!("1️⃣ Monday", option.to_string());

        let bare = PollOption::parse("Maybe");
        assert_eq!("", bare.glyph);
        assert_eq!("Maybe", bare.to_string());
    }

    #[test]
    fn votes_keep_first_vote_order() {
        let mut votes = Votes::new();
        votes.set("a", Selection::Single(0));
        votes.set("b", Selection::Single(1));
        votes.set("a", Selection::Single(2));

        let order: Vec<&str> = votes.iter().map(|(u, _)| u).collect();
        assert_eq!(vec!["a", "b"], order);
        assert_eq!(Some(&Selection::Single(2)), votes.get("a"));

        votes.remove("a");
        votes.set("a", Selection::Single(0));
        let order: Vec<&str> = votes.iter().map(|(u, _)| u).collect();
        assert_eq!(vec!["b", "a"], order);
    }

    #[test]
    fn votes_serialize_as_ordered_entries() {
        let votes: Votes = vec![
            ("u2".to_owned(), Selection::Single(1)),
            ("u1".to_owned(), Selection::Multiple([0, 2].into_iter().collect())),
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_string(&votes).unwrap();
        assert_eq!(
            r#"[{"user_id":"u2","selection":1},{"user_id":"u1","selection":[0,2]}]"#,
            json
        );
        let back: Votes = serde_json::from_str(&json).unwrap();
        assert_eq!(votes, back);
    }

    #[test]
    fn prune_drops_invalid_selections() {
        let mut votes: Votes = serde_json::from_str(
            r#"[
                {"user_id":"a","selection":9},
                {"user_id":"b","selection":[1,7]},
                {"user_id":"c","selection":[]},
                {"user_id":"d","selection":0},
                {"user_id":"d","selection":1}
            ]"#,
        )
        .unwrap();

        assert_eq!(4, votes.prune(3));
        assert_eq!(2, votes.len());
        assert_eq!(Some(&Selection::Multiple([1].into_iter().collect())), votes.get("b"));
        assert_eq!(Some(&Selection::Single(0)), votes.get("d"));
    }
}
