//! Slash commands typed at the chat prompt.

use std::fmt;
use std::path::PathBuf;

pub const HELP: &str = "\
Commands:
  /join                 announce yourself to the network
  /leave                say goodbye (you stay connected)
  /who                  ask who is online
  /peers                list peers known locally
  /msg <handle> <text>  send a message
  /img <handle> <path>  send an image file
  /whois <handle>       look up a single user
  /help                 show this help
  /quit                 leave and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Join,
    Leave,
    Who,
    Peers,
    Msg { to: String, text: String },
    Img { to: String, path: PathBuf },
    Whois { handle: String },
    Help,
    Quit,
}

/// Why a line could not be turned into a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    NotACommand,
    Unknown(String),
    Usage(&'static str),
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotACommand => f.write_str("commands start with '/'; try /help"),
            Self::Unknown(name) => write!(f, "unknown command /{name}; try /help"),
            Self::Usage(usage) => write!(f, "usage: {usage}"),
        }
    }
}

impl ChatCommand {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, UsageError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Err(UsageError::NotACommand);
        };

        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };

        let command = match name.to_ascii_lowercase().as_str() {
            "join" => Self::Join,
            "leave" => Self::Leave,
            "who" => Self::Who,
            "peers" => Self::Peers,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            "msg" => {
                let (to, text) =
                    split_target(args).ok_or(UsageError::Usage("/msg <handle> <text>"))?;
                Self::Msg {
                    to,
                    text: text.to_string(),
                }
            }
            "img" => {
                let (to, path) =
                    split_target(args).ok_or(UsageError::Usage("/img <handle> <path>"))?;
                Self::Img {
                    to,
                    path: PathBuf::from(path.trim_matches('"')),
                }
            }
            "whois" => {
                if args.is_empty() || args.contains(char::is_whitespace) {
                    return Err(UsageError::Usage("/whois <handle>"));
                }
                Self::Whois {
                    handle: args.to_string(),
                }
            }
            other => return Err(UsageError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

/// Split `<handle> <rest>`, requiring both parts.
fn split_target(args: &str) -> Option<(String, &str)> {
    let (to, rest) = args.split_once(char::is_whitespace)?;
    let rest = rest.trim();
    if rest.is_empty() {
        None
    } else {
        Some((to.to_string(), rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(ChatCommand::parse("/join").unwrap(), Some(ChatCommand::Join));
        assert_eq!(ChatCommand::parse("  /WHO  ").unwrap(), Some(ChatCommand::Who));
        assert_eq!(ChatCommand::parse("/exit").unwrap(), Some(ChatCommand::Quit));
        assert_eq!(ChatCommand::parse("").unwrap(), None);
    }

    #[test]
    fn test_parse_msg_keeps_text_intact() {
        let cmd = ChatCommand::parse("/msg bob  see you at   noon ").unwrap();
        assert_eq!(
            cmd,
            Some(ChatCommand::Msg {
                to: "bob".into(),
                text: "see you at   noon".into()
            })
        );
    }

    #[test]
    fn test_parse_img_strips_quotes() {
        let cmd = ChatCommand::parse("/img bob \"my pics/cat.png\"").unwrap();
        assert_eq!(
            cmd,
            Some(ChatCommand::Img {
                to: "bob".into(),
                path: PathBuf::from("my pics/cat.png")
            })
        );
    }

    #[test]
    fn test_usage_errors() {
        assert_eq!(
            ChatCommand::parse("/msg bob"),
            Err(UsageError::Usage("/msg <handle> <text>"))
        );
        assert_eq!(
            ChatCommand::parse("/whois"),
            Err(UsageError::Usage("/whois <handle>"))
        );
        assert_eq!(
            ChatCommand::parse("/dance"),
            Err(UsageError::Unknown("dance".into()))
        );
        assert_eq!(ChatCommand::parse("hello"), Err(UsageError::NotACommand));
    }
}
