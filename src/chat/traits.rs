//! Chat transport abstractions.
//!
//! Identifier newtypes, the inbound event model, and the `ChatClient`
//! trait the decision engine is generic over.

use async_trait::async_trait;
use std::fmt;

/// Chat (space) identifier. Group chats on the wire are negative numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ChatId(pub i64);

/// User identifier. Real accounts always have positive ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct UserId(pub i64);

/// Message identifier, unique within its chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct MessageId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message author as reported by the transport.
#[derive(Debug, Clone)]
pub struct Sender {
    pub id: UserId,
    pub username: Option<String>,
    pub first_name: String,
    /// Machine account flag; bots are never gatekept.
    pub is_bot: bool,
}

/// Message payload. Everything that is not plain text is `Media`.
#[derive(Debug, Clone)]
pub enum MessageBody {
    Text(String),
    Media,
}

/// A single inbound chat message.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub chat: ChatId,
    pub id: MessageId,
    pub sender: Sender,
    pub body: MessageBody,
}

/// A join event: one or more members entering a chat at once.
#[derive(Debug, Clone)]
pub struct JoinEvent {
    pub chat: ChatId,
    pub members: Vec<Sender>,
}

/// Inbound transport event.
#[derive(Debug, Clone)]
pub enum Event {
    Joined(JoinEvent),
    Message(ChatMessage),
}

/// Membership status of a user within a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Owner,
    Administrator,
    Member,
    Restricted,
    Left,
    Banned,
}

impl MemberStatus {
    /// Whether this status carries moderation rights.
    pub fn is_elevated(&self) -> bool {
        matches!(self, MemberStatus::Owner | MemberStatus::Administrator)
    }
}

/// Result type for transport operations.
pub type ChatResult<T> = Result<T, ChatError>;

/// Chat transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("malformed API response: {0}")]
    InvalidResponse(String),
}

/// Chat transport abstraction.
///
/// All side-effect methods are best-effort from the engine's perspective:
/// the engine logs delivery failures and never lets them abort a state
/// transition that already committed.
#[async_trait]
pub trait ChatClient: Clone + Send + Sync {
    /// Send a text message, optionally as a reply to another message.
    /// Returns the id of the delivered message.
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> ChatResult<MessageId>;

    /// Delete a message.
    async fn delete_message(&self, chat: ChatId, message: MessageId) -> ChatResult<()>;

    /// Resolve the membership status of a user within a chat.
    ///
    /// This may be a remote round trip. Callers decide how failures map to
    /// privileges; the admin cache maps every failure to "not an admin".
    async fn member_status(&self, chat: ChatId, user: UserId) -> ChatResult<MemberStatus>;
}
