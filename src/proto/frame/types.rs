use bytes::Bytes;

/// A RESP2 frame.
///
/// - SimpleString: status replies like "OK"
/// - Error: error replies from the server
/// - Integer: numeric replies
/// - BulkString: binary-safe strings, `None` for the null bulk string
/// - Array: command arguments and multi-bulk replies
/// - Null: the null array
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string (+OK).
    SimpleString(Vec<u8>),
    /// Error (-ERR).
    Error(Vec<u8>),
    /// Integer (:1000).
    Integer(i64),
    /// Bulk string ($6\r\nfoobar).
    BulkString(Option<Bytes>),
    /// Array (*2\r\n...).
    Array(Vec<Frame>),
    /// Null (*-1).
    Null,
}

impl Frame {
    /// Builds a non-null bulk string frame.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::BulkString(Some(data.into()))
    }

    /// Builds a simple string frame.
    pub fn simple(s: impl AsRef<[u8]>) -> Self {
        Frame::SimpleString(s.as_ref().to_vec())
    }

    /// Builds an error frame.
    pub fn error(message: impl AsRef<[u8]>) -> Self {
        Frame::Error(message.as_ref().to_vec())
    }

    /// Returns true for both null encodings (`$-1` and `*-1`).
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null | Frame::BulkString(None))
    }

    /// Returns true if this frame is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }

    /// Returns the textual payload of string-like frames.
    ///
    /// Integers are rendered in decimal, which is how sentinels report
    /// numeric fields in some versions.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Frame::SimpleString(s) | Frame::Error(s) => {
                Some(String::from_utf8_lossy(s).into_owned())
            }
            Frame::BulkString(Some(b)) => Some(String::from_utf8_lossy(b).into_owned()),
            Frame::Integer(i) => Some(i.to_string()),
            _ => None,
        }
    }

    /// Returns the first error frame contained in this frame, descending one
    /// level into arrays.
    ///
    /// Used to detect script results and `EXEC` replies that carry a failed
    /// element.
    pub fn first_error(&self) -> Option<String> {
        match self {
            Frame::Error(e) => Some(String::from_utf8_lossy(e).into_owned()),
            Frame::Array(items) => items.iter().find_map(|item| match item {
                Frame::Error(e) => Some(String::from_utf8_lossy(e).into_owned()),
                _ => None,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_as_text() {
        assert_eq!(Frame::simple("OK").as_text(), Some("OK".to_string()));
        assert_eq!(Frame::bulk("6380").as_text(), Some("6380".to_string()));
        assert_eq!(Frame::Integer(2).as_text(), Some("2".to_string()));
        assert_eq!(Frame::Null.as_text(), None);
        assert_eq!(Frame::Array(vec![]).as_text(), None);
    }

    #[test]
    fn test_frame_is_null() {
        assert!(Frame::Null.is_null());
        assert!(Frame::BulkString(None).is_null());
        assert!(!Frame::Integer(42).is_null());
    }

    #[test]
    fn test_first_error_in_array() {
        let frame = Frame::Array(vec![
            Frame::Integer(1),
            Frame::error("ERR Operation against a key holding the wrong kind of value"),
        ]);
        assert_eq!(
            frame.first_error().as_deref(),
            Some("ERR Operation against a key holding the wrong kind of value")
        );
        assert_eq!(Frame::Array(vec![Frame::Integer(1)]).first_error(), None);
    }
}
