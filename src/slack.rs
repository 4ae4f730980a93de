//! Slack Web API transport.
//!
//! Thin blocking client over the handful of methods the notifier uses.
//! Responses with `"ok": false` become [`TransportError::Api`].

use std::time::Duration;

use jiff::Timestamp;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::model::{Block, Message};
use crate::transport::{Result, Transport, TransportError, Window};

/// Default Slack Web API base URL.
pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

const PAGE_LIMIT: &str = "200";

#[derive(Debug, Deserialize)]
struct ChannelsPage {
    #[serde(default)]
    channels: Vec<Named>,
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct MembersPage {
    #[serde(default)]
    members: Vec<Named>,
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Named {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    user: Named,
}

#[derive(Debug, Deserialize)]
struct HistoryPage {
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct Posted {
    ts: String,
    message: Option<RawMessage>,
}

/// A message as Slack returns it. Blocks stay untyped until conversion
/// because other posters use block types buildbot doesn't model.
#[derive(Debug, Deserialize)]
struct RawMessage {
    ts: String,
    user: Option<String>,
    #[serde(default)]
    blocks: Vec<Value>,
}

impl From<RawMessage> for Message {
    fn from(raw: RawMessage) -> Self {
        Self {
            ts: raw.ts,
            user: raw.user,
            blocks: raw
                .blocks
                .into_iter()
                .filter_map(|block| serde_json::from_value::<Block>(block).ok())
                .collect(),
        }
    }
}

/// Posts and reads messages through the Slack Web API.
pub struct SlackTransport {
    http: reqwest::blocking::Client,
    api_base: String,
    token: String,
    username: String,
    icon_emoji: String,
}

impl SlackTransport {
    pub fn new(
        api_base: &str,
        token: &str,
        username: &str,
        icon_emoji: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .user_agent("buildbot")
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
            username: username.to_string(),
            icon_emoji: icon_emoji.to_string(),
        })
    }

    fn get<T: DeserializeOwned>(&self, method: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self
            .http
            .get(format!("{}/{method}", self.api_base))
            .bearer_auth(&self.token)
            .query(query)
            .send()?
            .error_for_status()?;
        decode(method, response.json()?)
    }

    fn post_json<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T> {
        let response = self
            .http
            .post(format!("{}/{method}", self.api_base))
            .bearer_auth(&self.token)
            .json(body)
            .send()?
            .error_for_status()?;
        decode(method, response.json()?)
    }

    /// Walks a cursor-paginated listing until `pick` finds a match.
    fn scan_pages<P, F>(
        &self,
        method: &str,
        extra: &[(&str, &str)],
        mut pick: F,
    ) -> Result<Option<String>>
    where
        P: DeserializeOwned + Paged,
        F: FnMut(&Named) -> Option<String>,
    {
        let mut cursor = String::new();
        loop {
            // An empty cursor asks for the first page.
            let mut query = vec![("limit", PAGE_LIMIT), ("cursor", cursor.as_str())];
            query.extend_from_slice(extra);

            let page: P = self.get(method, &query)?;
            if let Some(found) = page.entries().iter().find_map(&mut pick) {
                return Ok(Some(found));
            }
            match page.next_cursor() {
                Some(next) if !next.is_empty() => cursor = next.to_string(),
                _ => return Ok(None),
            }
        }
    }
}

trait Paged {
    fn entries(&self) -> &[Named];
    fn next_cursor(&self) -> Option<&str>;
}

impl Paged for ChannelsPage {
    fn entries(&self) -> &[Named] {
        &self.channels
    }

    fn next_cursor(&self) -> Option<&str> {
        self.response_metadata.as_ref()?.next_cursor.as_deref()
    }
}

impl Paged for MembersPage {
    fn entries(&self) -> &[Named] {
        &self.members
    }

    fn next_cursor(&self) -> Option<&str> {
        self.response_metadata.as_ref()?.next_cursor.as_deref()
    }
}

impl Transport for SlackTransport {
    fn find_channel(&self, name: &str) -> Result<Option<String>> {
        self.scan_pages::<ChannelsPage, _>(
            "conversations.list",
            &[
                ("exclude_archived", "true"),
                ("types", "public_channel,private_channel"),
            ],
            |ch| (ch.name == name).then(|| ch.id.clone()),
        )
    }

    fn history(&self, channel: &str, window: Window) -> Result<Vec<Message>> {
        let oldest = slack_ts(window.oldest);
        let latest = slack_ts(window.latest);
        let limit = window.limit.to_string();
        let page: HistoryPage = self.get(
            "conversations.history",
            &[
                ("channel", channel),
                ("oldest", oldest.as_str()),
                ("latest", latest.as_str()),
                ("limit", limit.as_str()),
                ("inclusive", "true"),
            ],
        )?;
        Ok(page.messages.into_iter().map(Message::from).collect())
    }

    fn user_name(&self, user_id: &str) -> Result<Option<String>> {
        match self.get::<UserInfo>("users.info", &[("user", user_id)]) {
            Ok(info) => Ok(Some(info.user.name)),
            Err(TransportError::Api { error, .. }) if error == "user_not_found" => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn find_user(&self, name: &str) -> Result<Option<String>> {
        self.scan_pages::<MembersPage, _>("users.list", &[], |member| {
            (member.name == name).then(|| member.id.clone())
        })
    }

    fn post(&self, channel: &str, blocks: &[Block]) -> Result<Message> {
        let posted: Posted = self.post_json(
            "chat.postMessage",
            &json!({
                "channel": channel,
                "username": self.username,
                "icon_emoji": self.icon_emoji,
                "blocks": blocks,
            }),
        )?;
        Ok(posted_message(posted, blocks))
    }

    fn update(&self, channel: &str, ts: &str, blocks: &[Block]) -> Result<Message> {
        let posted: Posted = self.post_json(
            "chat.update",
            &json!({
                "channel": channel,
                "ts": ts,
                "blocks": blocks,
            }),
        )?;
        Ok(posted_message(posted, blocks))
    }

    fn reply(&self, channel: &str, thread_ts: &str, text: &str) -> Result<Message> {
        let posted: Posted = self.post_json(
            "chat.postMessage",
            &json!({
                "channel": channel,
                "thread_ts": thread_ts,
                "username": self.username,
                "icon_emoji": self.icon_emoji,
                "text": text,
            }),
        )?;
        Ok(posted_message(posted, &[]))
    }
}

/// Checks the `ok` flag and decodes the body.
fn decode<T: DeserializeOwned>(method: &str, body: Value) -> Result<T> {
    if body.get("ok").and_then(Value::as_bool) != Some(true) {
        let error = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        return Err(TransportError::Api {
            method: method.to_string(),
            error: error.to_string(),
        });
    }
    Ok(serde_json::from_value(body)?)
}

/// The message as sent; Slack echoes it back without the poster on updates.
fn posted_message(posted: Posted, blocks: &[Block]) -> Message {
    let user = posted.message.and_then(|m| m.user);
    Message {
        ts: posted.ts,
        user,
        blocks: blocks.to_vec(),
    }
}

/// Slack's `seconds.micros` timestamp form.
fn slack_ts(at: Timestamp) -> String {
    format!("{}.{:06}", at.as_second(), at.subsec_microsecond())
}
