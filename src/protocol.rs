//! # Protocol Parser
//!
//! This module implements the newline-delimited text protocol spoken by clients.
//!
//! ## Protocol Format
//!
//! Every request is one line terminated by `\n` (an optional `\r` before it is
//! ignored). Fields are separated by whitespace and command names are
//! case-sensitive:
//!
//! - `AUTH <secret>` - Authenticate this connection with the shared secret
//! - `SET <key> <value> [<ttl-seconds>]` - Store a value, optionally expiring it
//! - `GET <key>` - Retrieve a value
//! - `DEL <key>` - Delete a key
//!
//! ## Example Usage
//! ```text
//! AUTH secret123
//! SET session:1 alice 30
//! GET session:1
//! DEL session:1
//! ```
//!
//! ## Response Format
//! Every reply is a single line terminated by `\r\n`:
//! - `OK`, `ERROR`, or the raw value for GET
//! - `ERROR invalid auth`, `ERROR invalid command`
//! - `ERROR <message>` for malformed requests

use std::time::Duration;
use thiserror::Error;

/// Line terminator appended to every reply.
pub const CRLF: &str = "\r\n";

/// Reply for a missing or wrong shared secret.
pub const ERROR_INVALID_AUTH: &str = "ERROR invalid auth";

/// Reply for an unrecognised command token.
pub const ERROR_INVALID_COMMAND: &str = "ERROR invalid command";

/// Reasons a frame is rejected before any command runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty command")]
    EmptyCommand,

    #[error("request is not valid utf-8")]
    InvalidUtf8,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("{0} command requires {1}")]
    MissingArgument(&'static str, &'static str),

    #[error("{0} command takes at most {1} arguments")]
    TooManyArguments(&'static str, usize),

    #[error("SET expiry must be a whole number of seconds, got '{0}'")]
    InvalidExpiry(String),
}

/// A structurally valid request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Authenticate with a candidate secret
    Auth { secret: String },

    /// Store a value; `expiry` is `None` for keys that never expire
    Set {
        key: String,
        value: String,
        expiry: Option<Duration>,
    },

    /// Retrieve a value
    Get { key: String },

    /// Delete a key
    Del { key: String },
}

impl Command {
    /// Protocol token of this command, used for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Auth { .. } => "AUTH",
            Command::Set { .. } => "SET",
            Command::Get { .. } => "GET",
            Command::Del { .. } => "DEL",
        }
    }

    /// Decode one raw frame, with or without its line terminator.
    ///
    /// # Errors
    /// Returns a [`ProtocolError`] for anything that must not reach storage:
    /// an empty line, non-UTF-8 bytes, an unknown command, or arguments that
    /// do not fit the command's grammar.
    pub fn parse(frame: &[u8]) -> Result<Command, ProtocolError> {
        let line = std::str::from_utf8(frame).map_err(|_| ProtocolError::InvalidUtf8)?;
        let parts: Vec<&str> = line.split_whitespace().collect();

        let Some((&cmd, args)) = parts.split_first() else {
            return Err(ProtocolError::EmptyCommand);
        };

        match cmd {
            "AUTH" => {
                let [secret] = exact::<1>("AUTH", "a secret", args)?;
                Ok(Command::Auth {
                    secret: secret.trim().to_string(),
                })
            }
            "SET" => {
                if args.len() < 2 {
                    return Err(ProtocolError::MissingArgument("SET", "a key and value"));
                }
                if args.len() > 3 {
                    return Err(ProtocolError::TooManyArguments("SET", 3));
                }
                let expiry = match args.get(2) {
                    Some(raw) => parse_expiry(raw)?,
                    None => None,
                };
                Ok(Command::Set {
                    key: args[0].to_string(),
                    value: args[1].to_string(),
                    expiry,
                })
            }
            "GET" => {
                let [key] = exact::<1>("GET", "a key", args)?;
                Ok(Command::Get {
                    key: key.to_string(),
                })
            }
            "DEL" => {
                let [key] = exact::<1>("DEL", "a key", args)?;
                Ok(Command::Del {
                    key: key.to_string(),
                })
            }
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

fn exact<'a, const N: usize>(
    cmd: &'static str,
    what: &'static str,
    args: &[&'a str],
) -> Result<[&'a str; N], ProtocolError> {
    if args.len() < N {
        return Err(ProtocolError::MissingArgument(cmd, what));
    }
    <[&str; N]>::try_from(args).map_err(|_| ProtocolError::TooManyArguments(cmd, N))
}

// Zero seconds means the key does not expire.
fn parse_expiry(raw: &str) -> Result<Option<Duration>, ProtocolError> {
    let secs: u64 = raw
        .parse()
        .map_err(|_| ProtocolError::InvalidExpiry(raw.to_string()))?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

/// A reply written back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Error,
    /// GET result
    Value(String),
    InvalidAuth,
    InvalidCommand,
    /// Validation failure, sent verbatim after `ERROR `
    Invalid(String),
}

impl Reply {
    /// The reply as one terminated buffer, ready for a single write call.
    pub fn to_bytes(&self) -> Vec<u8> {
        let body = match self {
            Reply::Ok => "OK".to_string(),
            Reply::Error => "ERROR".to_string(),
            Reply::Value(value) => value.clone(),
            Reply::InvalidAuth => ERROR_INVALID_AUTH.to_string(),
            Reply::InvalidCommand => ERROR_INVALID_COMMAND.to_string(),
            Reply::Invalid(msg) => format!("ERROR {}", msg),
        };
        let mut out = body.into_bytes();
        out.extend_from_slice(CRLF.as_bytes());
        out
    }
}

impl From<ProtocolError> for Reply {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnknownCommand(_) => Reply::InvalidCommand,
            other => Reply::Invalid(other.to_string()),
        }
    }
}
