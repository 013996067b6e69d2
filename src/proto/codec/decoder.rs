use bytes::{Buf, Bytes, BytesMut};

use crate::proto::error::DecodeError;
use crate::proto::frame::Frame;

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024; // 512 MB default

/// Deepest array nesting accepted in one reply.
pub const MAX_NESTING_DEPTH: usize = 512;

/// A streaming RESP decoder.
///
/// Call [`append`](Decoder::append) with bytes read from the socket, then
/// [`decode`](Decoder::decode) until it returns `Ok(None)`. Nothing is
/// consumed from the buffer until a whole frame (including every nested
/// array element) is available, so a reply split across several reads is
/// never lost. Progress through a partial frame is kept between calls, so
/// each byte is scanned once however many reads the frame spans.
///
/// # Example
///
/// ```
/// use muxis_sentinel::proto::codec::Decoder;
/// use muxis_sentinel::proto::frame::Frame;
///
/// let mut decoder = Decoder::new();
/// decoder.append(b"+OK\r\n");
/// let frame = decoder.decode().unwrap().unwrap();
/// assert_eq!(frame, Frame::SimpleString(b"OK".to_vec()));
/// ```
#[derive(Debug)]
pub struct Decoder {
    buf: BytesMut,
    max_frame_size: usize,
    scan: Scan,
}

/// How far the buffered partial frame has been checked.
#[derive(Debug, Default)]
struct Scan {
    pos: usize,
    /// Elements still expected by each open array, innermost last.
    open: Vec<usize>,
}

impl Decoder {
    /// Creates a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a new decoder with a custom maximum frame size.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
            scan: Scan::default(),
        }
    }

    /// Appends raw bytes to the internal buffer.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns true if there are buffered bytes not yet decoded.
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Attempts to decode one frame from the buffer.
    ///
    /// Returns `Ok(None)` if more data is needed.
    pub fn decode(&mut self) -> Result<Option<Frame>, DecodeError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        if self.buf.len() > self.max_frame_size {
            return Err(DecodeError::new("Buffer size exceeded maximum frame size"));
        }

        if !self.scan_frame()? {
            return Ok(None);
        }
        let end = std::mem::take(&mut self.scan).pos;

        let (frame, consumed) = build(&self.buf[..end], 0, 0)?;
        self.buf.advance(consumed);
        Ok(Some(frame))
    }

    /// Advances the scan cursor element by element. Returns true once
    /// `buf[..scan.pos]` holds one complete top-level frame.
    fn scan_frame(&mut self) -> Result<bool, DecodeError> {
        loop {
            let pos = self.scan.pos;
            let Some(&tag) = self.buf.get(pos) else {
                return Ok(false);
            };
            let Some(line_end) = find_crlf(&self.buf, pos + 1) else {
                return Ok(false);
            };
            let line = &self.buf[pos + 1..line_end];
            let mut next = line_end + 2;
            let mut opens_array = false;

            match tag {
                b'+' | b'-' => {}
                b':' => {
                    parse_int(line)?;
                }
                b'$' => {
                    let len = parse_int(line)?;
                    if len >= 0 {
                        let len = len as usize;
                        if len > self.max_frame_size {
                            return Err(DecodeError::new(
                                "Bulk string length exceeds maximum frame size",
                            ));
                        }
                        if self.buf.len() < next + len + 2 {
                            return Ok(false);
                        }
                        if &self.buf[next + len..next + len + 2] != b"\r\n" {
                            return Err(DecodeError::new("bulk string is not terminated by CRLF"));
                        }
                        next += len + 2;
                    }
                }
                b'*' => {
                    let len = parse_int(line)?;
                    if len > 0 {
                        let len = len as usize;
                        // Assume minimum 16 bytes per item
                        if len > self.max_frame_size / 16 {
                            return Err(DecodeError::new("Array length exceeds reasonable maximum"));
                        }
                        if self.scan.open.len() >= MAX_NESTING_DEPTH {
                            return Err(DecodeError::new(format!(
                                "Array nesting exceeds maximum depth of {}",
                                MAX_NESTING_DEPTH
                            )));
                        }
                        self.scan.open.push(len);
                        opens_array = true;
                    }
                }
                other => {
                    return Err(DecodeError::new(format!(
                        "unknown frame type: {}",
                        other as char
                    )))
                }
            }
            self.scan.pos = next;

            if opens_array {
                continue;
            }
            // One element finished; close every array it completes.
            loop {
                match self.scan.open.last_mut() {
                    None => return Ok(true),
                    Some(remaining) if *remaining > 1 => {
                        *remaining -= 1;
                        break;
                    }
                    Some(_) => {
                        self.scan.open.pop();
                    }
                }
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the frame starting at `pos` from bytes already validated by the
/// scan, returning it with the offset just past its end.
fn build(buf: &[u8], pos: usize, depth: usize) -> Result<(Frame, usize), DecodeError> {
    let truncated = || DecodeError::new("frame ended before its last element");
    if depth > MAX_NESTING_DEPTH {
        return Err(DecodeError::new("Array nesting exceeds maximum depth"));
    }
    let tag = *buf.get(pos).ok_or_else(truncated)?;
    let line_end = find_crlf(buf, pos + 1).ok_or_else(truncated)?;
    let line = &buf[pos + 1..line_end];
    let next = line_end + 2;

    match tag {
        b'+' => Ok((Frame::SimpleString(line.to_vec()), next)),
        b'-' => Ok((Frame::Error(line.to_vec()), next)),
        b':' => Ok((Frame::Integer(parse_int(line)?), next)),
        b'$' => {
            let len = parse_int(line)?;
            if len < 0 {
                return Ok((Frame::BulkString(None), next));
            }
            let data = buf.get(next..next + len as usize).ok_or_else(truncated)?;
            Ok((
                Frame::BulkString(Some(Bytes::copy_from_slice(data))),
                next + data.len() + 2,
            ))
        }
        b'*' => {
            let len = parse_int(line)?;
            if len < 0 {
                return Ok((Frame::Null, next));
            }
            let mut items = Vec::with_capacity((len as usize).min(1024));
            let mut cursor = next;
            for _ in 0..len {
                let (frame, end) = build(buf, cursor, depth + 1)?;
                items.push(frame);
                cursor = end;
            }
            Ok((Frame::Array(items), cursor))
        }
        other => Err(DecodeError::new(format!(
            "unknown frame type: {}",
            other as char
        ))),
    }
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| from + i)
}

fn parse_int(line: &[u8]) -> Result<i64, DecodeError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            DecodeError::new(format!(
                "invalid integer: {}",
                String::from_utf8_lossy(line)
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error() {
        let mut decoder = Decoder::new();
        decoder.append(b"-NOSCRIPT No matching script\r\n");
        let frame = decoder.decode().unwrap().unwrap();
        assert_eq!(frame, Frame::Error(b"NOSCRIPT No matching script".to_vec()));
    }

    #[test]
    fn test_decode_null_bulk_string() {
        let mut decoder = Decoder::new();
        decoder.append(b"$-1\r\n");
        assert_eq!(decoder.decode().unwrap(), Some(Frame::BulkString(None)));
    }

    #[test]
    fn test_decode_null_array() {
        let mut decoder = Decoder::new();
        decoder.append(b"*-1\r\n");
        assert_eq!(decoder.decode().unwrap(), Some(Frame::Null));
    }

    #[test]
    fn test_decode_master_address_reply() {
        let mut decoder = Decoder::new();
        decoder.append(b"*2\r\n$9\r\n127.0.0.1\r\n$4\r\n6379\r\n");
        assert_eq!(
            decoder.decode().unwrap(),
            Some(Frame::Array(vec![
                Frame::bulk("127.0.0.1"),
                Frame::bulk("6379")
            ]))
        );
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_decode_nested_array_split_across_reads() {
        let mut decoder = Decoder::new();
        decoder.append(b"*1\r\n*4\r\n$4\r\nname\r\n$8\r\nmymaster\r\n$2\r\nip");
        assert!(decoder.decode().unwrap().is_none());
        assert!(decoder.has_pending());

        decoder.append(b"\r\n$9\r\n127.0.0.1\r\n");
        let frame = decoder.decode().unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Array(vec![Frame::Array(vec![
                Frame::bulk("name"),
                Frame::bulk("mymaster"),
                Frame::bulk("ip"),
                Frame::bulk("127.0.0.1"),
            ])])
        );
    }

    #[test]
    fn test_decode_two_frames_back_to_back() {
        let mut decoder = Decoder::new();
        decoder.append(b"+OK\r\n:7\r\n");
        assert_eq!(decoder.decode().unwrap(), Some(Frame::simple("OK")));
        assert_eq!(decoder.decode().unwrap(), Some(Frame::Integer(7)));
        assert_eq!(decoder.decode().unwrap(), None);
    }

    #[test]
    fn test_decode_unknown_type() {
        let mut decoder = Decoder::new();
        decoder.append(b"?what\r\n");
        let err = decoder.decode().unwrap_err();
        assert!(err.to_string().contains("unknown frame type"));
    }

    #[test]
    fn test_decode_invalid_integer() {
        let mut decoder = Decoder::new();
        decoder.append(b":12x\r\n");
        assert!(decoder.decode().is_err());
    }

    #[test]
    fn test_decoder_bulk_string_exceeds_max_size() {
        let mut decoder = Decoder::with_max_frame_size(10);
        decoder.append(b"$100\r\n");
        let err = decoder.decode().unwrap_err();
        assert!(err
            .to_string()
            .contains("Bulk string length exceeds maximum"));
    }

    #[test]
    fn test_decoder_array_exceeds_reasonable_max() {
        let mut decoder = Decoder::with_max_frame_size(1024);
        let data = format!("*{}\r\n", (1024 / 16) + 100);
        decoder.append(data.as_bytes());
        let err = decoder.decode().unwrap_err();
        assert!(err
            .to_string()
            .contains("Array length exceeds reasonable maximum"));
    }

    #[test]
    fn test_decoder_bulk_string_missing_terminator() {
        let mut decoder = Decoder::new();
        decoder.append(b"$3\r\nfooXY");
        assert!(decoder.decode().is_err());
    }

    #[test]
    fn test_decode_empty_array_inside_array() {
        let mut decoder = Decoder::new();
        decoder.append(b"*2\r\n*0\r\n:1\r\n");
        assert_eq!(
            decoder.decode().unwrap(),
            Some(Frame::Array(vec![Frame::Array(vec![]), Frame::Integer(1)]))
        );
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_decode_rejects_deep_nesting() {
        let mut decoder = Decoder::new();
        decoder.append(&b"*1\r\n".repeat(200_000));
        let err = decoder.decode().unwrap_err();
        assert!(err.to_string().contains("nesting exceeds maximum depth"));
    }

    #[test]
    fn test_decode_accepts_nesting_at_limit() {
        let mut decoder = Decoder::new();
        let mut wire = b"*1\r\n".repeat(MAX_NESTING_DEPTH);
        wire.extend_from_slice(b":1\r\n");
        decoder.append(&wire);

        let frame = decoder.decode().unwrap().unwrap();
        let mut current = &frame;
        let mut depth = 0;
        while let Frame::Array(items) = current {
            current = &items[0];
            depth += 1;
        }
        assert_eq!(depth, MAX_NESTING_DEPTH);
        assert_eq!(current, &Frame::Integer(1));
    }

    #[test]
    fn test_decode_large_listing_fed_in_small_reads() {
        let entry = b"*2\r\n$4\r\nport\r\n$4\r\n6380\r\n";
        let mut wire = b"*1000\r\n".to_vec();
        for _ in 0..1000 {
            wire.extend_from_slice(entry);
        }
        wire.extend_from_slice(b"+OK\r\n");

        let mut decoder = Decoder::new();
        let mut frames = Vec::new();
        for chunk in wire.chunks(7) {
            decoder.append(chunk);
            while let Some(frame) = decoder.decode().unwrap() {
                frames.push(frame);
            }
        }
        assert_eq!(frames.len(), 2);
        match &frames[0] {
            Frame::Array(items) => assert_eq!(items.len(), 1000),
            other => panic!("expected array, got {:?}", other),
        }
        assert_eq!(frames[1], Frame::simple("OK"));
    }
}
