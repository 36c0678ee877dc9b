//! Chat transport layer.
//!
//! The engine talks to the chat platform through the [`ChatClient`] trait.
//! `TelegramClient` is the production implementation; `MockChatClient`
//! replaces it in tests so every gatekeeping path can run without a
//! network.

pub mod mock;
pub mod telegram;
pub mod traits;

pub use mock::MockChatClient;
pub use telegram::TelegramClient;
pub use traits::{ChatClient, ChatError, ChatResult, Event};
