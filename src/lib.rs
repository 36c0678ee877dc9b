//! Vestibule - introduction gatekeeper bot for community chats.
//!
//! New members must post an accepted self-introduction in a designated
//! introduction chat before their messages in the main chat are allowed
//! through. Until then their posts are removed and answered with a
//! rate-limited, self-deleting reminder.
//!
//! Key principles:
//! - One decision per inbound event, produced by an ordered pipeline
//! - All rate-limit and admin state lives in owned, bounded caches
//! - Delivery failures never undo a committed state transition

pub mod chat;
pub mod gatekeeper;
pub mod store;
