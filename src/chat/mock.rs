//! Mock chat client for tests.
//!
//! Records every outbound side effect and serves configured membership
//! statuses, with injectable failures for the resolver and for delivery.

use super::traits::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock chat client.
#[derive(Clone)]
pub struct MockChatClient {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    sent: Vec<SentMessage>,
    deleted: Vec<(ChatId, MessageId)>,
    statuses: HashMap<(ChatId, UserId), MemberStatus>,
    status_calls: u32,
    fail_member_status: bool,
    fail_send: bool,
    fail_delete: bool,
    next_message_id: i64,
}

/// One recorded outbound message.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub chat: ChatId,
    pub id: MessageId,
    pub text: String,
    pub reply_to: Option<MessageId>,
}

impl MockChatClient {
    /// Create a new mock client.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                next_message_id: 1000,
                ..MockState::default()
            })),
        }
    }

    /// Configure the membership status returned for a (chat, user) pair.
    /// Unconfigured pairs resolve to `MemberStatus::Member`.
    pub fn set_member_status(&self, chat: ChatId, user: UserId, status: MemberStatus) {
        let mut state = self.state.lock().unwrap();
        state.statuses.insert((chat, user), status);
    }

    /// Make every `member_status` call fail until switched back off.
    pub fn set_member_status_failure(&self, fail: bool) {
        self.state.lock().unwrap().fail_member_status = fail;
    }

    /// Make every `send_message` call fail until switched back off.
    pub fn set_send_failure(&self, fail: bool) {
        self.state.lock().unwrap().fail_send = fail;
    }

    /// Make every `delete_message` call fail until switched back off.
    pub fn set_delete_failure(&self, fail: bool) {
        self.state.lock().unwrap().fail_delete = fail;
    }

    /// Messages sent so far, for assertions.
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Deletions performed so far, for assertions.
    pub fn deleted_messages(&self) -> Vec<(ChatId, MessageId)> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// How many times `member_status` was invoked.
    pub fn status_calls(&self) -> u32 {
        self.state.lock().unwrap().status_calls
    }

    /// Forget recorded messages and deletions (statuses stay configured).
    pub fn clear_recorded(&self) {
        let mut state = self.state.lock().unwrap();
        state.sent.clear();
        state.deleted.clear();
    }
}

impl Default for MockChatClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> ChatResult<MessageId> {
        let mut state = self.state.lock().unwrap();
        if state.fail_send {
            return Err(ChatError::Api {
                code: 429,
                description: "Too Many Requests".to_string(),
            });
        }
        state.next_message_id += 1;
        let id = MessageId(state.next_message_id);
        state.sent.push(SentMessage {
            chat,
            id,
            text: text.to_string(),
            reply_to,
        });
        Ok(id)
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> ChatResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_delete {
            return Err(ChatError::Api {
                code: 400,
                description: "message can't be deleted".to_string(),
            });
        }
        state.deleted.push((chat, message));
        Ok(())
    }

    async fn member_status(&self, chat: ChatId, user: UserId) -> ChatResult<MemberStatus> {
        let mut state = self.state.lock().unwrap();
        state.status_calls += 1;
        if state.fail_member_status {
            return Err(ChatError::Api {
                code: 400,
                description: "chat not found".to_string(),
            });
        }
        Ok(state
            .statuses
            .get(&(chat, user))
            .copied()
            .unwrap_or(MemberStatus::Member))
    }
}
