use super::Command;
use crate::error::{Error, Result};
use bytes::Bytes;
use std::str;

/// Parse a command from its argument vector.
///
/// Names are matched exactly and case-sensitively; each command takes a
/// fixed number of arguments.
pub fn parse_command(args: Vec<Bytes>) -> Result<Command> {
    let mut args = args.into_iter();
    let name = match args.next() {
        Some(name) => name,
        None => return Err(Error::InvalidCommand(String::new())),
    };
    let rest: Vec<Bytes> = args.collect();

    match &name[..] {
        b"get" => {
            let [key] = exact::<1>(rest, "get")?;
            Ok(Command::Get(key))
        }

        b"set" => {
            let [key, value] = exact::<2>(rest, "set")?;
            Ok(Command::Set { key, value })
        }

        b"del" => {
            let [key] = exact::<1>(rest, "del")?;
            Ok(Command::Del(key))
        }

        b"keys" => {
            let [] = exact::<0>(rest, "keys")?;
            Ok(Command::Keys)
        }

        b"pexpire" => {
            let [key, millis] = exact::<2>(rest, "pexpire")?;
            Ok(Command::PExpire {
                key,
                millis: extract_integer(&millis)?,
            })
        }

        b"pttl" => {
            let [key] = exact::<1>(rest, "pttl")?;
            Ok(Command::PTtl(key))
        }

        b"zadd" => {
            let [key, score, member] = exact::<3>(rest, "zadd")?;
            Ok(Command::ZAdd {
                key,
                score: extract_score(&score)?,
                member,
            })
        }

        b"zrem" => {
            let [key, member] = exact::<2>(rest, "zrem")?;
            Ok(Command::ZRem { key, member })
        }

        b"zscore" => {
            let [key, member] = exact::<2>(rest, "zscore")?;
            Ok(Command::ZScore { key, member })
        }

        b"zrank" => {
            let [key, member] = exact::<2>(rest, "zrank")?;
            Ok(Command::ZRank { key, member })
        }

        b"zcard" => {
            let [key] = exact::<1>(rest, "zcard")?;
            Ok(Command::ZCard(key))
        }

        b"zquery" => {
            let [key, score, member, offset, limit] = exact::<5>(rest, "zquery")?;
            Ok(Command::ZQuery {
                key,
                score: extract_score(&score)?,
                member,
                offset: extract_integer(&offset)?,
                limit: extract_integer(&limit)?,
            })
        }

        _ => Err(Error::InvalidCommand(
            String::from_utf8_lossy(&name).into_owned(),
        )),
    }
}

fn exact<const N: usize>(args: Vec<Bytes>, cmd: &str) -> Result<[Bytes; N]> {
    <[Bytes; N]>::try_from(args).map_err(|_| Error::WrongArity(cmd.to_string()))
}

fn extract_score(arg: &[u8]) -> Result<f64> {
    let s = str::from_utf8(arg).map_err(|_| Error::InvalidArgument("expect float".into()))?;
    match s.parse::<f64>() {
        Ok(score) if !score.is_nan() => Ok(score),
        _ => Err(Error::InvalidArgument("expect float".into())),
    }
}

fn extract_integer(arg: &[u8]) -> Result<i64> {
    str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::InvalidArgument("expect int".into()))
}
