//! Length-prefixed framing.
//!
//! ```text
//! Request:  [u32 body_len][u32 argc][u32 len1][arg1]...[u32 lenN][argN]
//! Response: [u32 resp_len][u32 status][payload]
//! ```
//!
//! All integers are little-endian. `resp_len` covers the status word and the
//! payload.

use super::reply::Status;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Largest request body or response accepted on the wire
pub const MAX_MSG: usize = 32 << 20;

/// Largest argument count of a single request
pub const MAX_ARGS: usize = 200 * 1000;

/// Size of the length prefix
pub const HEADER_LEN: usize = 4;

/// Protocol violations. Any of these closes the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("message length {0} exceeds the limit")]
    TooLong(usize),

    #[error("argument count {0} exceeds the limit")]
    TooManyArgs(usize),

    #[error("message body is truncated")]
    Truncated,

    #[error("{0} trailing bytes after the last argument")]
    TrailingBytes(usize),

    #[error("unknown response status {0}")]
    UnknownStatus(u32),
}

/// Read the length prefix at the front of `buf` without consuming it.
fn peek_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let mut header = &buf[..HEADER_LEN];
    Some(header.get_u32_le() as usize)
}

/// Pull one complete request off the front of `buf`.
///
/// Returns `Ok(None)` while the frame is incomplete; nothing is consumed in
/// that case. An oversized length prefix is rejected before its body arrives.
pub fn parse_request(buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>, FrameError> {
    let Some(len) = peek_len(buf) else {
        return Ok(None);
    };
    if len > MAX_MSG {
        return Err(FrameError::TooLong(len));
    }
    if buf.len() < HEADER_LEN + len {
        return Ok(None);
    }

    let mut frame = buf.split_to(HEADER_LEN + len).freeze();
    frame.advance(HEADER_LEN);
    parse_body(frame).map(Some)
}

/// Split a request body into its arguments. The arguments share `body`'s storage.
pub fn parse_body(mut body: Bytes) -> Result<Vec<Bytes>, FrameError> {
    if body.remaining() < 4 {
        return Err(FrameError::Truncated);
    }
    let argc = body.get_u32_le() as usize;
    if argc > MAX_ARGS {
        return Err(FrameError::TooManyArgs(argc));
    }

    let mut args = Vec::with_capacity(argc.min(body.remaining() / 4));
    for _ in 0..argc {
        if body.remaining() < 4 {
            return Err(FrameError::Truncated);
        }
        let len = body.get_u32_le() as usize;
        if body.remaining() < len {
            return Err(FrameError::Truncated);
        }
        args.push(body.split_to(len));
    }

    if body.has_remaining() {
        return Err(FrameError::TrailingBytes(body.remaining()));
    }
    Ok(args)
}

/// Append one framed request carrying `args` to `out`.
pub fn encode_request<A: AsRef<[u8]>>(args: &[A], out: &mut Vec<u8>) {
    let body_len: usize = 4 + args.iter().map(|a| 4 + a.as_ref().len()).sum::<usize>();
    out.reserve(HEADER_LEN + body_len);
    out.put_u32_le(body_len as u32);
    out.put_u32_le(args.len() as u32);
    for arg in args {
        let arg = arg.as_ref();
        out.put_u32_le(arg.len() as u32);
        out.put_slice(arg);
    }
}

/// Append one framed response to `out`.
pub fn encode_response(status: Status, payload: &[u8], out: &mut Vec<u8>) {
    out.put_u32_le(4 + payload.len() as u32);
    out.put_u32_le(status as u32);
    out.put_slice(payload);
}

/// Pull one complete response off the front of `buf`.
pub fn parse_response(buf: &mut BytesMut) -> Result<Option<(Status, Bytes)>, FrameError> {
    let Some(len) = peek_len(buf) else {
        return Ok(None);
    };
    if len > MAX_MSG + 4 {
        return Err(FrameError::TooLong(len));
    }
    if len < 4 {
        return Err(FrameError::Truncated);
    }
    if buf.len() < HEADER_LEN + len {
        return Ok(None);
    }

    let mut frame = buf.split_to(HEADER_LEN + len).freeze();
    frame.advance(HEADER_LEN);
    let code = frame.get_u32_le();
    let status = Status::from_u32(code).ok_or(FrameError::UnknownStatus(code))?;
    Ok(Some((status, frame)))
}
