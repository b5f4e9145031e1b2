use chrono::Utc;
use serde::Serialize;

use crate::model::{Poll, PollId, Timestamp};
use crate::tally::Tally;

const LIVE_COLOR: u32 = 0x0099ff;
const ENDED_COLOR: u32 = 0xff0000;
const RESULTS_COLOR: u32 = 0x00ff00;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Button {
    pub custom_id: String,
    pub label: String,
    pub emoji: String,
}

/// Platform-neutral message: a content line, one embed and option buttons.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Announcement {
    pub content: String,
    pub title: String,
    pub description: String,
    pub color: u32,
    pub fields: Vec<Field>,
    pub footer: Option<String>,
    pub timestamp: Timestamp,
    pub buttons: Vec<Button>,
}

pub fn button_id(poll_id: PollId, option_index: usize) -> String {
    format!("poll_{}_{}", poll_id, option_index)
}

fn mentions(voters: &[String]) -> Option<String> {
    if voters.is_empty() {
        return None;
    }
    Some(voters.iter()
        .map(|v| format!("<@{}>", v))
        .collect::<Vec<_>>()
        .join(", "))
}

/// The live poll message, with one button per option.
pub fn poll_announcement(poll: &Poll, tally: &Tally) -> Announcement {
    let mut fields: Vec<Field> = poll.options.iter()
        .zip(&tally.options)
        .map(|(option, counted)| Field {
            name: format!("{} ({} votes)", option, counted.count),
            value: mentions(&counted.voters).unwrap_or_else(|| "No votes yet".to_owned()),
            inline: false,
        })
        .collect();
    fields.push(Field {
        name: "Poll Ends".to_owned(),
        value: format!("<t:{}:R>", poll.end_time.timestamp()),
        inline: false,
    });

    let footer = if poll.multiple_choice {
        "Multiple choices allowed"
    } else {
        "Single choice only"
    };

    Announcement {
        content: "**Weekly Poll is Live!**".to_owned(),
        title: "📊 Weekly Availability Poll".to_owned(),
        description: poll.question.clone(),
        color: LIVE_COLOR,
        fields,
        footer: Some(footer.to_owned()),
        timestamp: Utc::now(),
        buttons: poll.options.iter()
            .enumerate()
            .map(|(i, option)| Button {
                custom_id: button_id(poll.id, i),
                label: option.label.clone(),
                emoji: option.glyph.clone(),
            })
            .collect(),
    }
}

/// The original message after closing: same fields, no buttons.
pub fn closed_announcement(poll: &Poll, tally: &Tally) -> Announcement {
    let mut announcement = poll_announcement(poll, tally);
    announcement.title = "📊 Weekly Poll (ENDED)".to_owned();
    announcement.color = ENDED_COLOR;
    announcement.buttons.clear();
    announcement
}

pub fn results_announcement(poll: &Poll, tally: &Tally) -> Announcement {
    let mut fields: Vec<Field> = poll.options.iter()
        .zip(&tally.options)
        .enumerate()
        .map(|(i, (option, counted))| Field {
            name: format!("{} - {} people ({:.1}%)", option, counted.count, tally.percentage(i)),
            value: mentions(&counted.voters).unwrap_or_else(|| "No one".to_owned()),
            inline: false,
        })
        .collect();
    fields.push(Field {
        name: "👥 Total Participants".to_owned(),
        value: tally.total_voters.to_string(),
        inline: true,
    });

    Announcement {
        content: "**Poll Results**".to_owned(),
        title: "Availability Poll Results".to_owned(),
        description: poll.question.clone(),
        color: RESULTS_COLOR,
        fields,
        footer: None,
        timestamp: Utc::now(),
        buttons: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{Selection, test_polls::new_mock_poll};
    use super::*;

    #[test]
    fn live_poll_lists_voters() {
        let mut poll = new_mock_poll(true);
        poll.votes.set("A", Selection::Multiple([0, 1].into_iter().collect()));
        poll.votes.set("B", Selection::Multiple([0].into_iter().collect()));

        let announcement = poll_announcement(&poll, &Tally::of(&poll));

        assert_eq!(9, announcement.fields.len());
        assert_eq!("1️⃣ Monday (2 votes)", announcement.fields[0].name);
        assert_eq!("<@A>, <@B>", announcement.fields[0].value);
        assert_eq!("No votes yet", announcement.fields[2].value);
        assert_eq!(format!("<t:{}:R>", poll.end_time.timestamp()), announcement.fields[8].value);
        assert_eq!(Some("Multiple choices allowed".to_owned()), announcement.footer);
        assert_eq!(8, announcement.buttons.len());
        assert_eq!(format!("poll_{}_7", poll.id), announcement.buttons[7].custom_id);
        assert_eq!("Unavailable", announcement.buttons[7].label);
        assert_eq!("❌", announcement.buttons[7].emoji);
    }

    #[test]
    fn closed_poll_has_no_buttons() {
        let poll = new_mock_poll(false);
        let announcement = closed_announcement(&poll, &Tally::of(&poll));

        assert!(announcement.buttons.is_empty());
        assert_eq!(ENDED_COLOR, announcement.color);
        assert_eq!(Some("Single choice only".to_owned()), announcement.footer);
    }

    #[test]
    fn results_show_percentages() {
        let mut poll = new_mock_poll(false);
        poll.votes.set("u1", Selection::Single(0));
        poll.votes.set("u2", Selection::Single(1));
        poll.votes.set("u3", Selection::Single(1));

        let results = results_announcement(&poll, &Tally::of(&poll));

        assert_eq!("1️⃣ Monday - 1 people (33.3%)", results.fields[0].name);
        assert_eq!("2️⃣ Tuesday - 2 people (66.7%)", results.fields[1].name);
        assert_eq!("No one", results.fields[2].value);
        assert_eq!("3️⃣ Wednesday - 0 people (0.0%)", results.fields[2].name);
        let total = results.fields.last().unwrap();
        assert_eq!("👥 Total Participants", total.name);
        assert_eq!("3", total.value);
    }
}
