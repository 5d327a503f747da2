use super::frame::{encode_response, HEADER_LEN, MAX_MSG};
use bytes::{Buf, BufMut, Bytes};

/// Response status word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    Err = 1,
    NotFound = 2,
}

impl Status {
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0 => Some(Status::Ok),
            1 => Some(Status::Err),
            2 => Some(Status::NotFound),
            _ => None,
        }
    }
}

/// A command's answer, before framing
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Ok with an empty payload
    Ok,
    /// Not-found with an empty payload
    NotFound,
    /// Error status, payload is the message text
    Error(String),
    /// Raw value bytes
    Bulk(Bytes),
    /// 8-byte little-endian i64
    Integer(i64),
    /// 8-byte little-endian f64
    Double(f64),
    /// `[u32 n]` then `[u32 len][bytes]` per key
    Keys(Vec<Bytes>),
    /// `[u32 n]` then `[u32 len][name][f64 score]` per member
    Members(Vec<(Bytes, f64)>),
}

impl Reply {
    pub fn status(&self) -> Status {
        match self {
            Reply::NotFound => Status::NotFound,
            Reply::Error(_) => Status::Err,
            _ => Status::Ok,
        }
    }

    fn write_payload(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Ok | Reply::NotFound => {}
            Reply::Error(msg) => buf.put_slice(msg.as_bytes()),
            Reply::Bulk(data) => buf.put_slice(data),
            Reply::Integer(n) => buf.put_i64_le(*n),
            Reply::Double(d) => buf.put_f64_le(*d),
            Reply::Keys(keys) => {
                buf.put_u32_le(keys.len() as u32);
                for key in keys {
                    buf.put_u32_le(key.len() as u32);
                    buf.put_slice(key);
                }
            }
            Reply::Members(members) => {
                buf.put_u32_le(members.len() as u32);
                for (name, score) in members {
                    buf.put_u32_le(name.len() as u32);
                    buf.put_slice(name);
                    buf.put_f64_le(*score);
                }
            }
        }
    }
}

/// Frame `reply` onto the end of `buf`.
///
/// A payload over the wire limit is replaced by an error reply.
pub fn write_reply(buf: &mut Vec<u8>, reply: &Reply) {
    let start = buf.len();
    buf.put_u32_le(0);
    buf.put_u32_le(reply.status() as u32);
    reply.write_payload(buf);

    let payload_len = buf.len() - start - HEADER_LEN - 4;
    if payload_len > MAX_MSG {
        buf.truncate(start);
        encode_response(Status::Err, b"response is too big", buf);
        return;
    }
    let resp_len = (4 + payload_len) as u32;
    buf[start..start + HEADER_LEN].copy_from_slice(&resp_len.to_le_bytes());
}

/// Decode an [`Reply::Integer`] payload.
pub fn decode_integer(mut payload: &[u8]) -> Option<i64> {
    (payload.len() == 8).then(|| payload.get_i64_le())
}

/// Decode a [`Reply::Double`] payload.
pub fn decode_double(mut payload: &[u8]) -> Option<f64> {
    (payload.len() == 8).then(|| payload.get_f64_le())
}

/// Decode a [`Reply::Keys`] payload.
pub fn decode_keys(mut payload: &[u8]) -> Option<Vec<Vec<u8>>> {
    if payload.remaining() < 4 {
        return None;
    }
    let n = payload.get_u32_le() as usize;
    let mut keys = Vec::with_capacity(n.min(payload.remaining() / 4));
    for _ in 0..n {
        if payload.remaining() < 4 {
            return None;
        }
        let len = payload.get_u32_le() as usize;
        if payload.remaining() < len {
            return None;
        }
        keys.push(payload[..len].to_vec());
        payload.advance(len);
    }
    payload.is_empty().then_some(keys)
}

/// Decode a [`Reply::Members`] payload.
pub fn decode_members(mut payload: &[u8]) -> Option<Vec<(Vec<u8>, f64)>> {
    if payload.remaining() < 4 {
        return None;
    }
    let n = payload.get_u32_le() as usize;
    let mut members = Vec::with_capacity(n.min(payload.remaining() / 12));
    for _ in 0..n {
        if payload.remaining() < 4 {
            return None;
        }
        let len = payload.get_u32_le() as usize;
        if payload.remaining() < len + 8 {
            return None;
        }
        let name = payload[..len].to_vec();
        payload.advance(len);
        members.push((name, payload.get_f64_le()));
    }
    payload.is_empty().then_some(members)
}
