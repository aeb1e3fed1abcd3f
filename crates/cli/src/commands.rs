//! Command dispatch (§6 External Interfaces).
//!
//! The fixed command surface is a closed list; this module only recognises
//! each name and routes it to a handler. Command grammar — how each
//! command's own arguments are parsed, or what key binding triggers it — is
//! explicitly out of scope; handlers here receive the raw remainder of the
//! line and decide for themselves how much of it to use.

/// The full, fixed command surface. Anything not in this list is
/// unrecognised.
pub const COMMANDS: &[&str] = &[
    "add",
    "alias",
    "authorization",
    "bind",
    "buffer",
    "chat_disable",
    "clear",
    "color",
    "connect",
    "del",
    "disconnect",
    "echo",
    "event",
    "group",
    "help",
    "iline",
    "info",
    "module",
    "move",
    "msay",
    "otr",
    "otrpolicy",
    "pgp",
    "quit",
    "rawxml",
    "rename",
    "request",
    "room",
    "roster",
    "say",
    "say_to",
    "screen_refresh",
    "set",
    "source",
    "status",
    "status_to",
    "version",
];

/// A line split into a recognised command name and its raw argument tail,
/// or a name that isn't in [`COMMANDS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    Known { name: String, args: String },
    Unrecognized { name: String },
}

/// Splits a `/command rest of line` input. Returns `None` for input that
/// isn't a command at all (doesn't start with `/`) — callers treat that as
/// a plain `say` to the current buffer.
pub fn parse(line: &str) -> Option<ParsedCommand> {
    let line = line.trim_start();
    let rest = line.strip_prefix('/')?;
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim_start()),
        None => (rest, ""),
    };
    let name = name.to_ascii_lowercase();

    if COMMANDS.contains(&name.as_str()) {
        Some(ParsedCommand::Known {
            name,
            args: args.to_string(),
        })
    } else {
        Some(ParsedCommand::Unrecognized { name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_a_known_command_and_splits_args() {
        assert_eq!(
            parse("/say_to bob@example.com hello there"),
            Some(ParsedCommand::Known {
                name: "say_to".to_string(),
                args: "bob@example.com hello there".to_string(),
            })
        );
    }

    #[test]
    fn command_names_are_case_insensitive() {
        assert_eq!(
            parse("/QUIT"),
            Some(ParsedCommand::Known {
                name: "quit".to_string(),
                args: String::new(),
            })
        );
    }

    #[test]
    fn unknown_command_is_reported_unrecognized() {
        assert_eq!(
            parse("/frobnicate now"),
            Some(ParsedCommand::Unrecognized {
                name: "frobnicate".to_string(),
            })
        );
    }

    #[test]
    fn non_command_input_is_not_a_command() {
        assert_eq!(parse("hello world"), None);
    }
}
