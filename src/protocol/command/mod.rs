use crate::error::Result;
use bytes::Bytes;

mod executor;
mod parser;

pub use executor::CommandExecutor;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // String commands
    Get(Bytes),
    Set {
        key: Bytes,
        value: Bytes,
    },
    Del(Bytes),
    Keys,

    // Expiry commands
    /// Expire `key` after `millis`; a non-positive delay deletes it at once
    PExpire {
        key: Bytes,
        millis: i64,
    },
    PTtl(Bytes),

    // Sorted-set commands
    ZAdd {
        key: Bytes,
        score: f64,
        member: Bytes,
    },
    ZRem {
        key: Bytes,
        member: Bytes,
    },
    ZScore {
        key: Bytes,
        member: Bytes,
    },
    ZRank {
        key: Bytes,
        member: Bytes,
    },
    ZCard(Bytes),
    /// Seek to the first member >= (score, member), step `offset`, list up to `limit`
    ZQuery {
        key: Bytes,
        score: f64,
        member: Bytes,
        offset: i64,
        limit: i64,
    },
}

impl Command {
    /// Parse command from a request's argument vector
    #[inline]
    pub fn from_args(args: Vec<Bytes>) -> Result<Self> {
        parser::parse_command(args)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Get(_) => "get",
            Command::Set { .. } => "set",
            Command::Del(_) => "del",
            Command::Keys => "keys",
            Command::PExpire { .. } => "pexpire",
            Command::PTtl(_) => "pttl",
            Command::ZAdd { .. } => "zadd",
            Command::ZRem { .. } => "zrem",
            Command::ZScore { .. } => "zscore",
            Command::ZRank { .. } => "zrank",
            Command::ZCard(_) => "zcard",
            Command::ZQuery { .. } => "zquery",
        }
    }
}
