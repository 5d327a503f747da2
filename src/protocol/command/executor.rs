use super::Command;
use crate::error::{Error, Result};
use crate::protocol::Reply;
use crate::storage::{InsertOutcome, KeyTtl, Keyspace, Value};
use bytes::Bytes;
use std::time::{Duration, Instant};

/// Executes parsed commands against a [`Keyspace`]
///
/// Owned by the event loop; every connection shares the one instance.
pub struct CommandExecutor {
    keyspace: Keyspace,
    commands_processed: u64,
}

impl CommandExecutor {
    pub fn new(keyspace: Keyspace) -> Self {
        Self {
            keyspace,
            commands_processed: 0,
        }
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub fn commands_processed(&self) -> u64 {
        self.commands_processed
    }

    /// Reclaim up to `limit` keys whose deadline has passed.
    pub fn expire_due(&mut self, limit: usize) -> usize {
        self.keyspace.expire_due(Instant::now(), limit)
    }

    /// Parse and run one request's argument vector.
    #[inline]
    pub fn dispatch(&mut self, args: Vec<Bytes>) -> Reply {
        match Command::from_args(args) {
            Ok(cmd) => self.execute(cmd),
            Err(e) => e.to_reply(),
        }
    }

    /// Execute a command and return its reply
    pub fn execute(&mut self, cmd: Command) -> Reply {
        self.commands_processed += 1;
        self.run(cmd).unwrap_or_else(|e| e.to_reply())
    }

    fn run(&mut self, cmd: Command) -> Result<Reply> {
        let reply = match cmd {
            Command::Get(key) => match self.keyspace.get(&key) {
                None => Reply::NotFound,
                Some(Value::Str(value)) => Reply::Bulk(value.clone()),
                Some(Value::ZSet(_)) => return Err(Error::WrongType("string")),
            },

            Command::Set { key, value } => {
                // Detach from the request buffer the argument was sliced from
                self.keyspace.set(&key, Bytes::copy_from_slice(&value));
                Reply::Ok
            }

            Command::Del(key) => {
                self.keyspace.del(&key);
                Reply::Ok
            }

            Command::Keys => {
                Reply::Keys(self.keyspace.keys().map(Bytes::copy_from_slice).collect())
            }

            Command::PExpire { key, millis } => {
                if self.keyspace.get(&key).is_none() {
                    return Ok(Reply::Integer(0));
                }
                if millis <= 0 {
                    self.keyspace.del(&key);
                    return Ok(Reply::Integer(1));
                }
                let deadline = Instant::now()
                    .checked_add(Duration::from_millis(millis as u64))
                    .ok_or_else(|| Error::InvalidArgument("expire time is out of range".into()))?;
                Reply::Integer(self.keyspace.expire_at(&key, deadline) as i64)
            }

            Command::PTtl(key) => match self.keyspace.ttl(&key) {
                KeyTtl::Missing => Reply::Integer(-2),
                KeyTtl::Persistent => Reply::Integer(-1),
                KeyTtl::Remaining(left) => {
                    Reply::Integer(i64::try_from(left.as_millis()).unwrap_or(i64::MAX))
                }
            },

            Command::ZAdd { key, score, member } => {
                let set = self.keyspace.zset_mut(&key)?;
                match set.insert(&member, score) {
                    InsertOutcome::Inserted => Reply::Integer(1),
                    InsertOutcome::Updated | InsertOutcome::Unchanged => Reply::Integer(0),
                }
            }

            Command::ZRem { key, member } => {
                let (removed, now_empty) = match self.keyspace.zset_existing_mut(&key)? {
                    Some(set) => match set.lookup(&member) {
                        Some(id) => {
                            set.delete(id);
                            (true, set.is_empty())
                        }
                        None => (false, false),
                    },
                    None => (false, false),
                };
                // An emptied sorted set does not keep its key
                if now_empty {
                    self.keyspace.del(&key);
                }
                Reply::Integer(removed as i64)
            }

            Command::ZScore { key, member } => {
                let set = self.keyspace.zset(&key)?;
                match set.and_then(|s| s.lookup(&member).map(|id| s.get(id).score())) {
                    Some(score) => Reply::Double(score),
                    None => Reply::NotFound,
                }
            }

            Command::ZRank { key, member } => {
                let set = self.keyspace.zset(&key)?;
                match set.and_then(|s| s.lookup(&member).map(|id| s.rank(id))) {
                    Some(rank) => Reply::Integer(rank as i64),
                    None => Reply::NotFound,
                }
            }

            Command::ZCard(key) => {
                let len = self.keyspace.zset(&key)?.map_or(0, |s| s.len());
                Reply::Integer(len as i64)
            }

            Command::ZQuery {
                key,
                score,
                member,
                offset,
                limit,
            } => {
                let Some(set) = self.keyspace.zset(&key)? else {
                    return Ok(Reply::Members(Vec::new()));
                };
                if limit <= 0 {
                    return Ok(Reply::Members(Vec::new()));
                }
                let start = set
                    .seek_ge(score, &member)
                    .and_then(|id| set.offset(id, offset));
                let members = set
                    .range(start, limit as usize)
                    .map(|node| (Bytes::copy_from_slice(node.name()), node.score()))
                    .collect();
                Reply::Members(members)
            }
        };
        Ok(reply)
    }
}
