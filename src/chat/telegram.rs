//! Telegram Bot API transport.
//!
//! Thin long-polling client: `getUpdates` for inbound events,
//! `sendMessage`/`deleteMessage` for side effects, `getChatMember` for
//! membership resolution. All gatekeeping logic lives in the engine; this
//! module only converts between wire payloads and the [`Event`] model.

use super::traits::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API client.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base: String,
}

/// Standard Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

/// One long-poll update. Only message-shaped payloads are interesting.
#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    message: Option<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    message_id: i64,
    chat: WireChat,
    from: Option<WireUser>,
    sender_chat: Option<WireChat>,
    text: Option<String>,
    new_chat_members: Option<Vec<WireUser>>,
}

#[derive(Debug, Deserialize)]
struct WireChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: i64,
    is_bot: bool,
    first_name: String,
    username: Option<String>,
}

impl From<WireUser> for Sender {
    fn from(user: WireUser) -> Self {
        Sender {
            id: UserId(user.id),
            username: user.username,
            first_name: user.first_name,
            is_bot: user.is_bot,
        }
    }
}

impl Update {
    /// Convert to the engine's event model.
    ///
    /// Returns `None` for update kinds the gatekeeper does not consume
    /// (edits, callbacks, service messages without content).
    pub fn into_event(self) -> Option<Event> {
        let message = self.message?;
        let chat = ChatId(message.chat.id);

        if let Some(members) = message.new_chat_members {
            if members.is_empty() {
                return None;
            }
            return Some(Event::Joined(JoinEvent {
                chat,
                members: members.into_iter().map(Sender::from).collect(),
            }));
        }

        let sender = match (message.from, message.sender_chat) {
            (Some(user), _) => Sender::from(user),
            // channel posts carry no user; surface the chat as the sender
            (None, Some(sender_chat)) => Sender {
                id: UserId(sender_chat.id),
                username: None,
                first_name: String::new(),
                is_bot: false,
            },
            (None, None) => return None,
        };

        let body = match message.text {
            Some(text) => MessageBody::Text(text),
            None => MessageBody::Media,
        };

        Some(Event::Message(ChatMessage {
            chat,
            id: MessageId(message.message_id),
            sender,
            body,
        }))
    }
}

/// Map a Bot API member status string to [`MemberStatus`].
fn parse_member_status(status: &str) -> ChatResult<MemberStatus> {
    match status {
        "creator" => Ok(MemberStatus::Owner),
        "administrator" => Ok(MemberStatus::Administrator),
        "member" => Ok(MemberStatus::Member),
        "restricted" => Ok(MemberStatus::Restricted),
        "left" => Ok(MemberStatus::Left),
        "kicked" => Ok(MemberStatus::Banned),
        other => Err(ChatError::InvalidResponse(format!(
            "unknown member status: {other}"
        ))),
    }
}

impl TelegramClient {
    /// Build a client for the given bot token.
    pub fn new(token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: format!("{API_BASE}/bot{token}"),
        }
    }

    async fn call<P, T>(&self, method: &str, params: &P) -> ChatResult<T>
    where
        P: Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}/{}", self.base, method);
        let response: ApiResponse<T> = self
            .http
            .post(&url)
            .json(params)
            .send()
            .await?
            .json()
            .await?;

        if response.ok {
            response.result.ok_or_else(|| {
                ChatError::InvalidResponse(format!("{method}: ok response without result"))
            })
        } else {
            Err(ChatError::Api {
                code: response.error_code.unwrap_or(0),
                description: response
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }

    /// Long-poll for updates with ids at or above `offset`.
    pub async fn poll_updates(&self, offset: i64, timeout: Duration) -> ChatResult<Vec<Update>> {
        #[derive(Serialize)]
        struct Params {
            offset: i64,
            timeout: u64,
            allowed_updates: &'static [&'static str],
        }

        self.call(
            "getUpdates",
            &Params {
                offset,
                timeout: timeout.as_secs(),
                allowed_updates: &["message"],
            },
        )
        .await
    }
}

#[async_trait]
impl ChatClient for TelegramClient {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> ChatResult<MessageId> {
        #[derive(Serialize)]
        struct Params<'a> {
            chat_id: i64,
            text: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            reply_to_message_id: Option<i64>,
        }

        #[derive(Deserialize)]
        struct Sent {
            message_id: i64,
        }

        let sent: Sent = self
            .call(
                "sendMessage",
                &Params {
                    chat_id: chat.0,
                    text,
                    reply_to_message_id: reply_to.map(|m| m.0),
                },
            )
            .await?;
        Ok(MessageId(sent.message_id))
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> ChatResult<()> {
        #[derive(Serialize)]
        struct Params {
            chat_id: i64,
            message_id: i64,
        }

        let _: bool = self
            .call(
                "deleteMessage",
                &Params {
                    chat_id: chat.0,
                    message_id: message.0,
                },
            )
            .await?;
        Ok(())
    }

    async fn member_status(&self, chat: ChatId, user: UserId) -> ChatResult<MemberStatus> {
        #[derive(Serialize)]
        struct Params {
            chat_id: i64,
            user_id: i64,
        }

        #[derive(Deserialize)]
        struct Member {
            status: String,
        }

        let member: Member = self
            .call(
                "getChatMember",
                &Params {
                    chat_id: chat.0,
                    user_id: user.0,
                },
            )
            .await?;
        parse_member_status(&member.status)
    }
}
