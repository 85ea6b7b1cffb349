//! Streaming RESP parser.
//!
//! Operates on buffered byte slices. The caller is responsible for reading
//! data from the network into a buffer — this parser is purely synchronous.
//!
//! A `Cursor<&[u8]>` tracks the position through the input without consuming
//! it, so the caller can retry the same buffer once more data arrives. A
//! buffer that holds only a prefix of a valid frame yields `Ok(None)`; bytes
//! that can never become a valid frame yield an error.
//!
//! Top-level frames and the direct children of a top-level array may be
//! any of the five types — command names can arrive as simple strings as
//! well as bulk strings. Positions nested deeper than one array level
//! only admit bulk strings and nested arrays; the command layer never
//! needs anything else there, and rejecting early keeps the executor's
//! input shape small.

use std::io::Cursor;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::types::Frame;

/// Maximum nesting depth for arrays. Prevents stack overflow from
/// malformed or malicious deeply-nested frames.
const MAX_NESTING_DEPTH: usize = 64;

/// Cap for `Vec::with_capacity` in array parsing. A huge declared count
/// must not translate into a huge upfront allocation before any child
/// has actually parsed.
const PREALLOC_CAP: usize = 1024;

/// Parses one complete RESP frame from the front of `buf`.
///
/// Returns `Ok(Some((frame, consumed)))` if a complete frame was parsed,
/// `Ok(None)` if the buffer doesn't contain enough data yet,
/// or `Err(...)` if the data is malformed.
#[inline]
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut cursor = Cursor::new(buf);

    match try_parse(&mut cursor, 0) {
        Ok(frame) => {
            let consumed = cursor.position() as usize;
            Ok(Some((frame, consumed)))
        }
        Err(ProtocolError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Maximum array depth at which the text types (`+`/`-`/`:`) may still
/// appear: the top level and the first array level, so that command
/// names can arrive as simple strings.
const MAX_TEXT_DEPTH: usize = 1;

/// Parses a complete frame from the cursor position, returning
/// `Incomplete` if the buffer doesn't contain enough data.
///
/// `depth` is 0 at the top level and counts enclosing arrays below it.
fn try_parse(cursor: &mut Cursor<&[u8]>, depth: usize) -> Result<Frame, ProtocolError> {
    let prefix = read_byte(cursor)?;

    match prefix {
        b'+' if depth <= MAX_TEXT_DEPTH => {
            let line = read_line(cursor)?;
            let s = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
            Ok(Frame::Simple(s.to_owned()))
        }
        b'-' if depth <= MAX_TEXT_DEPTH => {
            let line = read_line(cursor)?;
            let s = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
            Ok(Frame::Error(s.to_owned()))
        }
        b':' if depth <= MAX_TEXT_DEPTH => {
            let val = read_integer_line(cursor)?;
            Ok(Frame::Integer(val))
        }
        b'$' => parse_bulk(cursor),
        b'*' => {
            let next_depth = depth + 1;
            if next_depth > MAX_NESTING_DEPTH {
                return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
            }

            let count = read_integer_line(cursor)?;
            if count < 0 {
                return Err(ProtocolError::InvalidArrayLength(count));
            }

            let count = count as usize;
            let mut frames = Vec::with_capacity(count.min(PREALLOC_CAP));
            for _ in 0..count {
                frames.push(try_parse(cursor, next_depth)?);
            }
            Ok(Frame::Array(frames))
        }
        b'+' | b'-' | b':' => Err(ProtocolError::Unsupported(prefix)),
        other => Err(ProtocolError::InvalidType(other)),
    }
}

/// Parses a bulk string body after the `$` prefix has been consumed.
///
/// A negative declared length is the null bulk string and consumes the
/// length line only. Payload bytes must be free of raw `\r` and `\n` and
/// terminated by an exact `\r\n`.
fn parse_bulk(cursor: &mut Cursor<&[u8]>) -> Result<Frame, ProtocolError> {
    let len = read_integer_line(cursor)?;
    if len < 0 {
        return Ok(Frame::Null);
    }
    let len = len as usize;

    let pos = cursor.position() as usize;
    let buf = cursor.get_ref();

    // a CR or LF anywhere in the payload prefix already on hand means the
    // frame can never become valid, so fail before waiting for more bytes
    let avail = remaining(cursor).min(len);
    if memchr::memchr2(b'\r', b'\n', &buf[pos..pos + avail]).is_some() {
        return Err(ProtocolError::EmbeddedCrlf);
    }

    // need `len` payload bytes + \r\n
    if remaining(cursor) < len + 2 {
        return Err(ProtocolError::Incomplete);
    }

    if buf[pos + len] != b'\r' || buf[pos + len + 1] != b'\n' {
        return Err(ProtocolError::MissingCrlf);
    }

    let data = Bytes::copy_from_slice(&buf[pos..pos + len]);
    cursor.set_position((pos + len + 2) as u64);
    Ok(Frame::Bulk(data))
}

// ---------------------------------------------------------------------------
// low-level cursor helpers
// ---------------------------------------------------------------------------

fn read_byte(cursor: &mut Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    let pos = cursor.position() as usize;
    if pos >= cursor.get_ref().len() {
        return Err(ProtocolError::Incomplete);
    }
    cursor.set_position((pos + 1) as u64);
    Ok(cursor.get_ref()[pos])
}

/// Returns the slice of bytes up to (but not including) the next `\r\n`,
/// and advances the cursor past the `\r\n`.
fn read_line<'a>(cursor: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], ProtocolError> {
    let start = cursor.position() as usize;
    let end = find_crlf(cursor)?;
    Ok(&cursor.get_ref()[start..end])
}

/// Reads a line and parses it as an i64.
fn read_integer_line(cursor: &mut Cursor<&[u8]>) -> Result<i64, ProtocolError> {
    let line = read_line(cursor)?;
    parse_i64_bytes(line)
}

/// Finds the next `\r\n` starting from the cursor position. Returns the
/// index of the `\r` and advances the cursor past the `\n`.
fn find_crlf(cursor: &mut Cursor<&[u8]>) -> Result<usize, ProtocolError> {
    let buf = cursor.get_ref();
    let start = cursor.position() as usize;

    if start >= buf.len() {
        return Err(ProtocolError::Incomplete);
    }

    // memchr scans for \r, then \n must follow
    let mut pos = start;
    while let Some(offset) = memchr::memchr(b'\r', &buf[pos..]) {
        let cr = pos + offset;
        if cr + 1 < buf.len() && buf[cr + 1] == b'\n' {
            cursor.set_position((cr + 2) as u64);
            return Ok(cr);
        }
        // bare \r without \n — keep scanning past it
        pos = cr + 1;
    }

    Err(ProtocolError::Incomplete)
}

fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    let len = cursor.get_ref().len();
    let pos = cursor.position() as usize;
    len.saturating_sub(pos)
}

/// Parses an i64 directly from a byte slice without allocating a String.
///
/// Negative numbers are accumulated in the negative direction so that
/// `i64::MIN` is representable without overflow.
fn parse_i64_bytes(buf: &[u8]) -> Result<i64, ProtocolError> {
    if buf.is_empty() {
        return Err(ProtocolError::InvalidNumber);
    }

    let (negative, digits) = if buf[0] == b'-' {
        (true, &buf[1..])
    } else {
        (false, buf)
    };

    if digits.is_empty() {
        return Err(ProtocolError::InvalidNumber);
    }

    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::InvalidNumber);
        }
        let digit = (b - b'0') as i64;
        n = n
            .checked_mul(10)
            .and_then(|n| {
                if negative {
                    n.checked_sub(digit)
                } else {
                    n.checked_add(digit)
                }
            })
            .ok_or(ProtocolError::InvalidNumber)?;
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must_parse(input: &[u8]) -> Frame {
        let (frame, consumed) = parse_frame(input)
            .expect("parse should not error")
            .expect("parse should return a frame");
        assert_eq!(consumed, input.len(), "should consume entire input");
        frame
    }

    #[test]
    fn simple_string() {
        assert_eq!(must_parse(b"+OK\r\n"), Frame::Simple("OK".into()));
        assert_eq!(
            must_parse(b"+hello world\r\n"),
            Frame::Simple("hello world".into())
        );
    }

    #[test]
    fn simple_error() {
        assert_eq!(
            must_parse(b"-Invalid command\r\n"),
            Frame::Error("Invalid command".into())
        );
    }

    #[test]
    fn integer() {
        assert_eq!(must_parse(b":42\r\n"), Frame::Integer(42));
        assert_eq!(must_parse(b":0\r\n"), Frame::Integer(0));
        assert_eq!(must_parse(b":-1\r\n"), Frame::Integer(-1));
        assert_eq!(
            must_parse(b":9223372036854775807\r\n"),
            Frame::Integer(i64::MAX)
        );
        assert_eq!(
            must_parse(b":-9223372036854775808\r\n"),
            Frame::Integer(i64::MIN)
        );
    }

    #[test]
    fn bulk_string() {
        assert_eq!(
            must_parse(b"$5\r\nhello\r\n"),
            Frame::Bulk(Bytes::from_static(b"hello"))
        );
    }

    #[test]
    fn empty_bulk_string() {
        assert_eq!(must_parse(b"$0\r\n\r\n"), Frame::Bulk(Bytes::new()));
    }

    #[test]
    fn null_bulk_string() {
        assert_eq!(must_parse(b"$-1\r\n"), Frame::Null);
    }

    #[test]
    fn bulk_with_embedded_crlf_rejected() {
        // declared length 5, payload is "abc\r\n" — five bytes, but two
        // of them are CR/LF
        let err = parse_frame(b"$5\r\nabc\r\n\r\n").unwrap_err();
        assert_eq!(err, ProtocolError::EmbeddedCrlf);
    }

    #[test]
    fn short_bulk_with_crlf_fails_without_waiting() {
        // declared length 5 but only "abc\r\n" on hand — the CR in the
        // payload prefix means no continuation can ever make this valid
        let err = parse_frame(b"$5\r\nabc\r\n").unwrap_err();
        assert_eq!(err, ProtocolError::EmbeddedCrlf);
    }

    #[test]
    fn bulk_length_mismatch_rejected() {
        // declared length 3, payload followed by junk instead of \r\n
        let err = parse_frame(b"$3\r\nabcde\r\n").unwrap_err();
        assert_eq!(err, ProtocolError::MissingCrlf);
    }

    #[test]
    fn truncated_bulk_is_incomplete() {
        assert_eq!(parse_frame(b"$5\r\nhel").unwrap(), None);
        assert_eq!(parse_frame(b"$5\r\n").unwrap(), None);
    }

    #[test]
    fn array_of_bulk() {
        let input = b"*2\r\n$3\r\nGET\r\n$5\r\nmykey\r\n";
        assert_eq!(
            must_parse(input),
            Frame::Array(vec![
                Frame::Bulk(Bytes::from_static(b"GET")),
                Frame::Bulk(Bytes::from_static(b"mykey")),
            ])
        );
    }

    #[test]
    fn empty_array() {
        assert_eq!(must_parse(b"*0\r\n"), Frame::Array(vec![]));
    }

    #[test]
    fn nested_array() {
        let input = b"*2\r\n*1\r\n$1\r\na\r\n*1\r\n$1\r\nb\r\n";
        assert_eq!(
            must_parse(input),
            Frame::Array(vec![
                Frame::Array(vec![Frame::Bulk(Bytes::from_static(b"a"))]),
                Frame::Array(vec![Frame::Bulk(Bytes::from_static(b"b"))]),
            ])
        );
    }

    #[test]
    fn array_with_null_child() {
        let input = b"*2\r\n$-1\r\n$1\r\nx\r\n";
        assert_eq!(
            must_parse(input),
            Frame::Array(vec![Frame::Null, Frame::Bulk(Bytes::from_static(b"x"))])
        );
    }

    #[test]
    fn simple_string_command_name_on_the_wire() {
        let input = b"*2\r\n+GET\r\n$1\r\nk\r\n";
        assert_eq!(
            must_parse(input),
            Frame::Array(vec![
                Frame::Simple("GET".into()),
                Frame::Bulk(Bytes::from_static(b"k")),
            ])
        );
    }

    #[test]
    fn text_types_accepted_at_the_first_array_level() {
        assert_eq!(
            must_parse(b"*1\r\n:1\r\n"),
            Frame::Array(vec![Frame::Integer(1)])
        );
        assert_eq!(
            must_parse(b"*1\r\n-nope\r\n"),
            Frame::Array(vec![Frame::Error("nope".into())])
        );
    }

    #[test]
    fn text_types_nested_deeper_are_unsupported() {
        let err = parse_frame(b"*1\r\n*1\r\n+OK\r\n").unwrap_err();
        assert_eq!(err, ProtocolError::Unsupported(b'+'));

        let err = parse_frame(b"*1\r\n*1\r\n:1\r\n").unwrap_err();
        assert_eq!(err, ProtocolError::Unsupported(b':'));

        let err = parse_frame(b"*1\r\n*1\r\n-err\r\n").unwrap_err();
        assert_eq!(err, ProtocolError::Unsupported(b'-'));
    }

    #[test]
    fn negative_array_length_rejected() {
        let err = parse_frame(b"*-1\r\n").unwrap_err();
        assert_eq!(err, ProtocolError::InvalidArrayLength(-1));
    }

    #[test]
    fn incomplete_returns_none() {
        assert_eq!(parse_frame(b"").unwrap(), None);
        assert_eq!(parse_frame(b"+OK").unwrap(), None);
        assert_eq!(parse_frame(b"+OK\r").unwrap(), None);
        assert_eq!(parse_frame(b"*2\r\n$1\r\na\r\n").unwrap(), None);
    }

    #[test]
    fn invalid_prefix() {
        let err = parse_frame(b"~oops\r\n").unwrap_err();
        assert_eq!(err, ProtocolError::InvalidType(b'~'));
    }

    #[test]
    fn invalid_integer() {
        let err = parse_frame(b":abc\r\n").unwrap_err();
        assert_eq!(err, ProtocolError::InvalidNumber);
        let err = parse_frame(b":-\r\n").unwrap_err();
        assert_eq!(err, ProtocolError::InvalidNumber);
    }

    #[test]
    fn parse_consumes_exact_bytes() {
        // buffer contains a full frame plus the start of the next one
        let buf = b"+OK\r\n*1\r\n";
        let (frame, consumed) = parse_frame(buf).unwrap().unwrap();
        assert_eq!(frame, Frame::Simple("OK".into()));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn deeply_nested_array_rejected() {
        let mut buf = Vec::new();
        for _ in 0..65 {
            buf.extend_from_slice(b"*1\r\n");
        }
        buf.extend_from_slice(b"$1\r\nx\r\n");

        let err = parse_frame(&buf).unwrap_err();
        assert!(
            matches!(err, ProtocolError::NestingTooDeep(64)),
            "expected NestingTooDeep, got {err:?}"
        );
    }

    #[test]
    fn nesting_at_limit_accepted() {
        let mut buf = Vec::new();
        for _ in 0..64 {
            buf.extend_from_slice(b"*1\r\n");
        }
        buf.extend_from_slice(b"$1\r\nx\r\n");

        let result = parse_frame(&buf);
        assert!(result.is_ok(), "64 levels of nesting should be accepted");
        assert!(result.unwrap().is_some());
    }

    #[test]
    fn parse_i64_bytes_valid() {
        assert_eq!(parse_i64_bytes(b"0").unwrap(), 0);
        assert_eq!(parse_i64_bytes(b"42").unwrap(), 42);
        assert_eq!(parse_i64_bytes(b"-7").unwrap(), -7);
        assert_eq!(parse_i64_bytes(b"9223372036854775807").unwrap(), i64::MAX);
        assert_eq!(parse_i64_bytes(b"-9223372036854775808").unwrap(), i64::MIN);
    }

    #[test]
    fn parse_i64_bytes_invalid() {
        assert!(parse_i64_bytes(b"").is_err());
        assert!(parse_i64_bytes(b"-").is_err());
        assert!(parse_i64_bytes(b"abc").is_err());
        assert!(parse_i64_bytes(b"12a").is_err());
        assert!(parse_i64_bytes(b"99999999999999999999").is_err());
    }
}
