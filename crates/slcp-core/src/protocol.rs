//! SLCP wire format: one command per `\n`-terminated UTF-8 line.
//!
//! ```text
//! JOIN <handle> <port>
//! LEAVE <handle>
//! WHO
//! KNOWNUSERS <handle> <ip> <port>, <handle> <ip> <port>, ...
//! MSG <to> "<text>"
//! IMG <to> <size>
//! WHOIS <handle>
//! IAM <handle> <ip> <port>
//! ```
//!
//! Control lines travel as UDP datagrams (a datagram may hold several lines).
//! `IMG` additionally opens every TCP image transfer, followed by `size` raw bytes.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// One participant as advertised in `KNOWNUSERS` and `IAM`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserEntry {
    pub handle: String,
    pub ip: IpAddr,
    pub port: u16,
}

impl UserEntry {
    pub fn new(handle: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            handle: handle.into(),
            ip: addr.ip(),
            port: addr.port(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for UserEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.handle, self.ip, self.port)
    }
}

/// A single SLCP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Announce presence; `port` is where the sender receives unicast traffic.
    Join { handle: String, port: u16 },
    Leave { handle: String },
    /// Ask every discovery service for its participant list.
    Who,
    KnownUsers(Vec<UserEntry>),
    Msg { to: String, text: String },
    /// Image header. Over UDP it only announces the transfer.
    Img { to: String, size: u64 },
    Whois { handle: String },
    Iam { handle: String, ip: IpAddr, port: u16 },
}

/// Errors from parsing a single SLCP line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("{command} expects {expected} fields, got {got}")]
    Arity {
        command: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("invalid {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("invalid IP address: {0:?}")]
    InvalidAddress(String),
}

impl Message {
    /// The command keyword of this message.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Join { .. } => "JOIN",
            Self::Leave { .. } => "LEAVE",
            Self::Who => "WHO",
            Self::KnownUsers(_) => "KNOWNUSERS",
            Self::Msg { .. } => "MSG",
            Self::Img { .. } => "IMG",
            Self::Whois { .. } => "WHOIS",
            Self::Iam { .. } => "IAM",
        }
    }

    /// Parse one line. Surrounding whitespace (including the newline) is ignored.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::Empty);
        }
        let parts: Vec<&str> = line.split(' ').collect();
        let command = parts[0];

        match command {
            "JOIN" => {
                expect_fields("JOIN", "3", &parts, 3)?;
                Ok(Self::Join {
                    handle: parts[1].to_string(),
                    port: parse_number("port", parts[2])?,
                })
            }
            "LEAVE" => {
                expect_fields("LEAVE", "2", &parts, 2)?;
                Ok(Self::Leave {
                    handle: parts[1].to_string(),
                })
            }
            "WHO" => {
                expect_fields("WHO", "1", &parts, 1)?;
                Ok(Self::Who)
            }
            "MSG" => {
                if parts.len() < 3 {
                    return Err(ParseError::Arity {
                        command: "MSG",
                        expected: "at least 3",
                        got: parts.len(),
                    });
                }
                Ok(Self::Msg {
                    to: parts[1].to_string(),
                    text: parts[2..].join(" ").trim_matches('"').to_string(),
                })
            }
            "IMG" => {
                expect_fields("IMG", "3", &parts, 3)?;
                Ok(Self::Img {
                    to: parts[1].to_string(),
                    size: parse_number("size", parts[2])?,
                })
            }
            "KNOWNUSERS" => Ok(Self::KnownUsers(parse_user_list(&line[command.len()..]))),
            "WHOIS" => {
                expect_fields("WHOIS", "2", &parts, 2)?;
                Ok(Self::Whois {
                    handle: parts[1].to_string(),
                })
            }
            "IAM" => {
                expect_fields("IAM", "4", &parts, 4)?;
                Ok(Self::Iam {
                    handle: parts[1].to_string(),
                    ip: parse_ip(parts[2])?,
                    port: parse_number("port", parts[3])?,
                })
            }
            other => Err(ParseError::UnknownCommand(other.to_string())),
        }
    }

    /// Encode as a wire line including the trailing newline.
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Join { handle, port } => write!(f, "JOIN {handle} {port}"),
            Self::Leave { handle } => write!(f, "LEAVE {handle}"),
            Self::Who => f.write_str("WHO"),
            Self::KnownUsers(users) => {
                f.write_str("KNOWNUSERS")?;
                for (i, user) in users.iter().enumerate() {
                    f.write_str(if i == 0 { " " } else { ", " })?;
                    write!(f, "{user}")?;
                }
                Ok(())
            }
            // A newline inside the text would split the command in two.
            Self::Msg { to, text } => write!(f, "MSG {to} \"{}\"", text.replace(['\r', '\n'], " ")),
            Self::Img { to, size } => write!(f, "IMG {to} {size}"),
            Self::Whois { handle } => write!(f, "WHOIS {handle}"),
            Self::Iam { handle, ip, port } => write!(f, "IAM {handle} {ip} {port}"),
        }
    }
}

/// Parse every non-blank line of a datagram.
pub fn parse_datagram(text: &str) -> Vec<Result<Message, ParseError>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(Message::parse)
        .collect()
}

/// Parse the comma-separated body of a `KNOWNUSERS` line.
///
/// Malformed entries are skipped instead of failing the whole list, so one
/// peer with a broken advertisement cannot hide everyone else.
pub fn parse_user_list(body: &str) -> Vec<UserEntry> {
    body.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match parse_user_entry(entry) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::debug!("skipping KNOWNUSERS entry {:?}: {}", entry, e);
                None
            }
        })
        .collect()
}

fn parse_user_entry(entry: &str) -> Result<UserEntry, ParseError> {
    let fields: Vec<&str> = entry.split_whitespace().collect();
    if fields.len() != 3 {
        return Err(ParseError::Arity {
            command: "KNOWNUSERS entry",
            expected: "3",
            got: fields.len(),
        });
    }
    Ok(UserEntry {
        handle: fields[0].to_string(),
        ip: parse_ip(fields[1])?,
        port: parse_number("port", fields[2])?,
    })
}

fn expect_fields(
    command: &'static str,
    expected: &'static str,
    parts: &[&str],
    count: usize,
) -> Result<(), ParseError> {
    if parts.len() == count {
        Ok(())
    } else {
        Err(ParseError::Arity {
            command,
            expected,
            got: parts.len(),
        })
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn parse_ip(value: &str) -> Result<IpAddr, ParseError> {
    value
        .parse()
        .map_err(|_| ParseError::InvalidAddress(value.to_string()))
}
