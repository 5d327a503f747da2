use crate::protocol::{FrameError, Reply};
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Frame(#[from] FrameError),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The key holds a value of another type; carries the type expected
    #[error("Operation against a key holding the wrong kind of value, expected {0}")]
    WrongType(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Convert a command-level error to an error-status reply
    pub fn to_reply(&self) -> Reply {
        match self {
            Error::InvalidCommand(cmd) => Reply::Error(format!("unknown command '{}'", cmd)),
            Error::WrongArity(cmd) => {
                Reply::Error(format!("wrong number of arguments for '{}' command", cmd))
            }
            Error::InvalidArgument(msg) => Reply::Error(msg.clone()),
            Error::WrongType(expected) => Reply::Error(format!("expect {}", expected)),
            _ => Reply::Error(self.to_string()),
        }
    }
}
