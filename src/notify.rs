use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::render::Announcement;

#[cfg(test)]
use mockall::automock;

pub const TOKEN_ENV_KEY: &str = "POLLBOT_TOKEN";

const DISCORD_API: &str = "https://discord.com/api/v10";
const BUTTONS_PER_ROW: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("channel {0} unavailable")]
    ChannelUnavailable(String),
    #[error("message {0} unavailable")]
    MessageUnavailable(String),
    #[error("request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Delivers rendered polls to the chat platform.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Posts a new announcement and returns the id of the created message.
    async fn post_announcement(&self, channel_id: &str, announcement: &Announcement) -> Result<String, NotifyError>;
    async fn edit_announcement(&self, channel_id: &str, message_id: &str, announcement: &Announcement) -> Result<(), NotifyError>;
    async fn post_results(&self, channel_id: &str, results: &Announcement) -> Result<(), NotifyError>;
    async fn notify_voter(&self, user_id: &str, feedback: &str) -> Result<(), NotifyError>;
}

#[derive(Deserialize)]
struct Created {
    id: String,
}

/// Notifier backed by the Discord REST API.
pub struct DiscordNotifier {
    bot_token: String,
    base_url: String,
    client: reqwest::Client,
}

impl DiscordNotifier {
    pub fn new(bot_token: &str, timeout: Duration) -> Result<DiscordNotifier, NotifyError> {
        DiscordNotifier::with_base_url(bot_token, DISCORD_API, timeout)
    }

    /// Every request gives up after `timeout`, so a stalled platform cannot
    /// hold the poll manager.
    pub fn with_base_url(bot_token: &str, base_url: &str, timeout: Duration) -> Result<DiscordNotifier, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(DiscordNotifier {
            bot_token: bot_token.to_owned(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            client,
        })
    }

    async fn send_message(&self, channel_id: &str, body: &Value) -> Result<String, NotifyError> {
        let url = format!("{}/channels/{}/messages", self.base_url, channel_id);
        let response = self.client
            .post(&url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(body)
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(response.json::<Created>().await?.id),
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN =>
                Err(NotifyError::ChannelUnavailable(channel_id.to_owned())),
            status => Err(rejected(status, response).await),
        }
    }
}

async fn rejected(status: StatusCode, response: reqwest::Response) -> NotifyError {
    let body = response.text().await.unwrap_or_default();
    NotifyError::Rejected { status: status.as_u16(), body }
}

fn message_body(announcement: &Announcement) -> Value {
    let mut embed = json!({
        "title": announcement.title,
        "description": announcement.description,
        "color": announcement.color,
        "fields": announcement.fields,
        "timestamp": announcement.timestamp.to_rfc3339(),
    });
    if let Some(footer) = &announcement.footer {
        embed["footer"] = json!({ "text": footer });
    }

    let components: Vec<Value> = announcement.buttons
        .chunks(BUTTONS_PER_ROW)
        .map(|row| {
            let buttons: Vec<Value> = row.iter()
                .map(|b| {
                    let mut button = json!({
                        "type": 2,
                        "style": 1,
                        "custom_id": b.custom_id,
                        "label": b.label,
                    });
                    if !b.emoji.is_empty() {
                        button["emoji"] = json!({ "name": b.emoji });
                    }
                    button
                })
                .collect();
            json!({ "type": 1, "components": buttons })
        })
        .collect();

    json!({
        "content": announcement.content,
        "embeds": [embed],
        "components": components,
    })
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn post_announcement(&self, channel_id: &str, announcement: &Announcement) -> Result<String, NotifyError> {
        self.send_message(channel_id, &message_body(announcement)).await
    }

    async fn edit_announcement(&self, channel_id: &str, message_id: &str, announcement: &Announcement) -> Result<(), NotifyError> {
        let url = format!("{}/channels/{}/messages/{}", self.base_url, channel_id, message_id);
        let response = self.client
            .patch(&url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&message_body(announcement))
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(NotifyError::MessageUnavailable(message_id.to_owned())),
            status => Err(rejected(status, response).await),
        }
    }

    async fn post_results(&self, channel_id: &str, results: &Announcement) -> Result<(), NotifyError> {
        self.send_message(channel_id, &message_body(results)).await?;
        Ok(())
    }

    async fn notify_voter(&self, user_id: &str, feedback: &str) -> Result<(), NotifyError> {
        let url = format!("{}/users/@me/channels", self.base_url);
        let response = self.client
            .post(&url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&json!({ "recipient_id": user_id }))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(rejected(status, response).await);
        }
        let dm = response.json::<Created>().await?;
        self.send_message(&dm.id, &json!({ "content": feedback })).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::model::test_polls::new_mock_poll;
    use crate::render::{closed_announcement, poll_announcement};
    use crate::tally::Tally;
    use super::*;

    fn discord(server: &MockServer) -> DiscordNotifier {
        DiscordNotifier::with_base_url("secret", &server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn buttons_are_split_into_rows_of_five() {
        let poll = new_mock_poll(true);
        let body = message_body(&poll_announcement(&poll, &Tally::of(&poll)));

        let rows = body["components"].as_array().unwrap();
        assert_eq!(2, rows.len());
        assert_eq!(5, rows[0]["components"].as_array().unwrap().len());
        assert_eq!(3, rows[1]["components"].as_array().unwrap().len());
        assert_eq!("Monday", rows[0]["components"][0]["label"]);
        assert_eq!("1️⃣", rows[0]["components"][0]["emoji"]["name"]);
        assert_eq!("Multiple choices allowed", body["embeds"][0]["footer"]["text"]);
    }

    #[tokio::test]
    async fn post_announcement_returns_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/c1/messages"))
            .and(header("Authorization", "Bot secret"))
            .and(body_partial_json(json!({ "content": "**Weekly Poll is Live!**" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "m1" })))
            .mount(&server)
            .await;

        let notifier = discord(&server);
        let poll = new_mock_poll(true);
        let message_id = notifier
            .post_announcement("c1", &poll_announcement(&poll, &Tally::of(&poll)))
            .await
            .expect("post should succeed");

        assert_eq!("m1", message_id);
    }

    #[tokio::test]
    async fn missing_channel_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/gone/messages"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let notifier = discord(&server);
        let poll = new_mock_poll(true);
        let error = notifier
            .post_announcement("gone", &poll_announcement(&poll, &Tally::of(&poll)))
            .await
            .expect_err("post should fail");

        assert!(matches!(error, NotifyError::ChannelUnavailable(ref c) if c == "gone"));
    }

    #[tokio::test]
    async fn closed_edit_clears_components() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/channels/c1/messages/m1"))
            .and(body_partial_json(json!({ "components": [] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "m1" })))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = discord(&server);
        let poll = new_mock_poll(false);
        notifier
            .edit_announcement("c1", "m1", &closed_announcement(&poll, &Tally::of(&poll)))
            .await
            .expect("edit should succeed");
    }

    #[tokio::test]
    async fn stalled_platform_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200)
                .set_body_json(json!({ "id": "m1" }))
                .set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let notifier = DiscordNotifier::with_base_url("secret", &server.uri(), Duration::from_millis(100)).unwrap();
        let poll = new_mock_poll(true);
        let error = notifier
            .post_announcement("c1", &poll_announcement(&poll, &Tally::of(&poll)))
            .await
            .expect_err("request should time out");

        match error {
            NotifyError::Http(e) => assert!(e.is_timeout()),
            other => panic!("Expected Http timeout {:?}", other),
        }
    }
}
