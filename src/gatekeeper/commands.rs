//! Administrative command grammar.
//!
//! Moderators drive the gatekeeper with slash commands inside the chat.
//! Parsing is deliberately narrow: only the commands below are claimed,
//! so unrecognized slash words flow through the pipeline like ordinary
//! text and a pending user cannot use them as a reply channel.

use crate::chat::traits::UserId;

pub const USAGE_APPROVE: &str = "usage: /approve <user-id>";
pub const USAGE_RESET: &str = "usage: /reset <user-id>";
pub const USAGE_STATUS: &str = "usage: /status <user-id>";

/// Commands moderators issue through the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Mark a user introduced without running the validator.
    Approve { user: UserId },
    /// Revert a user to pending.
    Reset { user: UserId },
    /// Show one user's gatekeeping state.
    Status { user: UserId },
    /// List users still awaiting an accepted introduction.
    Pending,
    /// Designate the issuing chat as the gatekept main chat.
    SetMain,
    /// Designate the issuing chat as the introduction chat.
    SetIntro,
    /// Show available commands.
    Help,
    /// Recognized command with unusable arguments; reply with usage text.
    Usage(&'static str),
}

impl Command {
    /// Syntax and description for every user-facing command.
    pub fn help_entries() -> &'static [(&'static str, &'static str)] {
        &[
            ("/approve <user-id>", "Mark a user introduced without validation"),
            ("/reset <user-id>", "Revert a user to pending"),
            ("/status <user-id>", "Show a user's gatekeeping state"),
            ("/pending", "List users awaiting an introduction"),
            ("/set_main", "Make this chat the gatekept main chat"),
            ("/set_intro", "Make this chat the introduction chat"),
            ("/help", "Show this help message"),
        ]
    }
}

/// Parse a slash command out of message text.
///
/// Returns `None` for ordinary text and for slash words we do not own.
/// Addressed forms (`/approve@botname`) parse the same as bare ones.
pub fn parse_command(text: &str) -> Option<Command> {
    let mut parts = text.split_whitespace();
    let head = parts.next()?;
    if !head.starts_with('/') {
        return None;
    }
    let name = head[1..].split('@').next().unwrap_or("");

    match name {
        "approve" => Some(user_command(parts.next(), USAGE_APPROVE, |user| {
            Command::Approve { user }
        })),
        "reset" => Some(user_command(parts.next(), USAGE_RESET, |user| {
            Command::Reset { user }
        })),
        "status" => Some(user_command(parts.next(), USAGE_STATUS, |user| {
            Command::Status { user }
        })),
        "pending" => Some(Command::Pending),
        "set_main" => Some(Command::SetMain),
        "set_intro" => Some(Command::SetIntro),
        "help" => Some(Command::Help),
        _ => None,
    }
}

fn user_command(
    arg: Option<&str>,
    usage: &'static str,
    build: impl FnOnce(UserId) -> Command,
) -> Command {
    match arg.and_then(|raw| raw.parse::<i64>().ok()).filter(|id| *id > 0) {
        Some(id) => build(UserId(id)),
        None => Command::Usage(usage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_approve_with_id() {
        assert_eq!(
            parse_command("/approve 42"),
            Some(Command::Approve { user: UserId(42) })
        );
    }

    #[test]
    fn parses_addressed_form() {
        assert_eq!(
            parse_command("/approve@vestibule_bot 42"),
            Some(Command::Approve { user: UserId(42) })
        );
    }

    #[test]
    fn parses_reset_and_status() {
        assert_eq!(
            parse_command("/reset 7"),
            Some(Command::Reset { user: UserId(7) })
        );
        assert_eq!(
            parse_command("/status 7"),
            Some(Command::Status { user: UserId(7) })
        );
    }

    #[test]
    fn parses_argument_free_commands() {
        assert_eq!(parse_command("/pending"), Some(Command::Pending));
        assert_eq!(parse_command("/set_main"), Some(Command::SetMain));
        assert_eq!(parse_command("/set_intro"), Some(Command::SetIntro));
        assert_eq!(parse_command("/help"), Some(Command::Help));
    }

    #[test]
    fn missing_or_malformed_id_yields_usage() {
        assert_eq!(parse_command("/approve"), Some(Command::Usage(USAGE_APPROVE)));
        assert_eq!(
            parse_command("/approve alice"),
            Some(Command::Usage(USAGE_APPROVE))
        );
        assert_eq!(
            parse_command("/reset -5"),
            Some(Command::Usage(USAGE_RESET))
        );
        assert_eq!(
            parse_command("/status 0"),
            Some(Command::Usage(USAGE_STATUS))
        );
    }

    #[test]
    fn extra_arguments_are_ignored() {
        assert_eq!(
            parse_command("/approve 42 please"),
            Some(Command::Approve { user: UserId(42) })
        );
    }

    #[test]
    fn ordinary_text_is_not_a_command() {
        assert_eq!(parse_command("hello, my name is Greta"), None);
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("   "), None);
    }

    #[test]
    fn unknown_slash_words_are_not_claimed() {
        assert_eq!(parse_command("/banhammer 42"), None);
        assert_eq!(parse_command("/"), None);
    }
}
