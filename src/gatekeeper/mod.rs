//! The admission decision core.
//!
//! Combines the time-windowed rate limiter, the admin-status cache and the
//! introduction validator into the gatekeeping state machine. Everything
//! here is deterministic over an injected transport and store, so the full
//! decision surface is testable without a network.

pub mod admin_cache;
pub mod commands;
pub mod engine;
pub mod intro;
pub mod window_cache;

pub use admin_cache::{AdminCacheConfig, AdminStatusCache};
pub use commands::{parse_command, Command};
pub use engine::{AdminOutcome, Decision, EngineConfig, GatekeepEngine, NudgeReason};
pub use intro::{is_valid_intro, IntroPolicy};
pub use window_cache::{TimeWindowCache, WindowCacheConfig};
