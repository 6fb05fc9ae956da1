use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use conntime_metrics::{format_instant, parse_instant, Timestamp};
use rand::RngCore;
use thiserror::Error;

/// Ends a request. Cannot occur inside a base64 payload or an ISO-8601 line.
pub const TERMINATOR: &[u8] = b"\n\n.\n";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection closed before the request terminator")]
    Incomplete,
    #[error("request exceeds {limit} bytes without a terminator")]
    TooLarge { limit: usize },
    #[error("request does not start with an instant: {0:?}")]
    BadInstant(String),
    #[error("response has no receipt line")]
    MissingReceipt,
    #[error("invalid receipt instant {value:?}: {source}")]
    BadReceipt {
        value: String,
        source: chrono::ParseError,
    },
}

/// `size / 4 * 3` random bytes, base64 encoded, so the text is at most `size`
/// characters long.
pub fn random_payload(size: usize) -> String {
    let mut bytes = vec![0u8; size / 4 * 3];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(&bytes)
}

pub fn encode_request(connected: &Timestamp, payload_size: Option<usize>) -> Vec<u8> {
    let mut request = format_instant(connected);
    if let Some(size) = payload_size {
        request.push('\n');
        request.push_str(&random_payload(size));
    }
    let mut bytes = request.into_bytes();
    bytes.extend_from_slice(TERMINATOR);
    bytes
}

/// Largest request body accepted by default.
pub const DEFAULT_MAX_REQUEST: usize = 1024 * 1024;

/// Accumulates bytes until a full request has arrived, up to a size limit.
#[derive(Debug)]
pub struct FrameReader {
    buf: Vec<u8>,
    limit: usize,
}

impl Default for FrameReader {
    fn default() -> FrameReader {
        FrameReader::with_limit(DEFAULT_MAX_REQUEST)
    }
}

impl FrameReader {
    pub fn new() -> FrameReader {
        FrameReader::default()
    }

    /// `limit` bounds the request body; the terminator does not count.
    pub fn with_limit(limit: usize) -> FrameReader {
        FrameReader {
            buf: Vec::new(),
            limit,
        }
    }

    /// Append a chunk. Returns the request body (everything before the first
    /// terminator) once it is complete, or `TooLarge` once more than the
    /// limit is buffered without one.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, FrameError> {
        // the terminator may straddle the previous chunk
        let from = self.buf.len().saturating_sub(TERMINATOR.len() - 1);
        self.buf.extend_from_slice(chunk);
        match find(&self.buf[from..], TERMINATOR) {
            Some(pos) if from + pos <= self.limit => {
                self.buf.truncate(from + pos);
                Ok(Some(std::mem::replace(&mut self.buf, Vec::new())))
            }
            Some(_) => Err(FrameError::TooLarge { limit: self.limit }),
            None if self.buf.len() > self.limit + TERMINATOR.len() - 1 => {
                Err(FrameError::TooLarge { limit: self.limit })
            }
            None => Ok(None),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// Lines of `text` split on '\n', without trailing empty lines.
fn lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    while lines.last().map_or(false, |l| l.is_empty()) {
        lines.pop();
    }
    lines
}

/// Build the reply for a request body.
///
/// The first line is repeated as-is, followed by the receipt instant. Without
/// a payload size the remaining request lines are echoed, otherwise a fresh
/// payload of that size follows an empty line.
pub fn build_reply(
    body: &[u8],
    received: &Timestamp,
    payload_size: Option<usize>,
) -> Result<Vec<u8>, FrameError> {
    let text = String::from_utf8_lossy(body);
    let lines = lines(&text);
    let sent = lines.first().copied().unwrap_or("");
    if parse_instant(sent).is_err() {
        return Err(FrameError::BadInstant(sent.to_string()));
    }
    let mut reply = format!("{}\n{}\n", sent, format_instant(received));
    match payload_size {
        None => {
            for line in lines.iter().skip(1) {
                reply.push_str(line);
                reply.push('\n');
            }
        }
        Some(size) => {
            reply.push('\n');
            reply.push_str(&random_payload(size));
        }
    }
    Ok(reply.into_bytes())
}

/// Extract the server's receipt instant, the second line of a response.
pub fn parse_server_received(response: &[u8]) -> Result<Timestamp, FrameError> {
    let text = String::from_utf8_lossy(response);
    let value = text.split('\n').nth(1).ok_or(FrameError::MissingReceipt)?;
    parse_instant(value).map_err(|source| FrameError::BadReceipt {
        value: value.to_string(),
        source,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn instant() -> Timestamp {
        parse_instant("2024-01-01T00:00:00Z").unwrap()
    }

    #[test]
    fn request_without_payload() {
        let req = encode_request(&instant(), None);
        assert_eq!(req, b"2024-01-01T00:00:00Z\n\n.\n".to_vec());
    }

    #[test]
    fn request_payload_is_base64_of_three_quarters() {
        let req = encode_request(&instant(), Some(100));
        let text = String::from_utf8(req).unwrap();
        let lines: Vec<_> = text.split('\n').collect();
        assert_eq!(lines[0], "2024-01-01T00:00:00Z");
        assert_eq!(STANDARD.decode(lines[1]).unwrap().len(), 75);
        assert_eq!(lines[1].len(), 100);
        assert!(text.ends_with("\n\n.\n"));
        assert_eq!(text.matches("\n\n.\n").count(), 1);
    }

    #[test]
    fn reassembles_fragments() {
        let req = encode_request(&instant(), Some(64));
        let mut reader = FrameReader::new();
        let mut body = None;
        for chunk in req.chunks(3) {
            assert!(body.is_none(), "request completed early");
            body = reader.push(chunk).unwrap();
        }
        let body = body.unwrap();
        assert_eq!(body, &req[..req.len() - TERMINATOR.len()]);
    }

    #[test]
    fn terminator_split_across_chunks() {
        let mut reader = FrameReader::new();
        assert_eq!(reader.push(b"2024-01-01T00:00:00Z\n").unwrap(), None);
        assert_eq!(reader.push(b"\n").unwrap(), None);
        assert_eq!(reader.push(b".").unwrap(), None);
        assert_eq!(
            reader.push(b"\n").unwrap(),
            Some(b"2024-01-01T00:00:00Z".to_vec())
        );
    }

    #[test]
    fn body_at_the_limit_is_accepted() {
        let mut reader = FrameReader::with_limit(8);
        assert_eq!(reader.push(b"12345678").unwrap(), None);
        assert_eq!(reader.push(b"\n\n.\n").unwrap(), Some(b"12345678".to_vec()));
    }

    #[test]
    fn oversized_body_is_rejected() {
        let mut reader = FrameReader::with_limit(8);
        assert_eq!(reader.push(b"1234567").unwrap(), None);
        assert!(matches!(
            reader.push(b"89ABCDEF"),
            Err(FrameError::TooLarge { limit: 8 })
        ));

        // a terminator arriving with the excess does not rescue it
        let mut reader = FrameReader::with_limit(8);
        assert!(matches!(
            reader.push(b"123456789\n\n.\n"),
            Err(FrameError::TooLarge { limit: 8 })
        ));
    }

    #[test]
    fn echo_reply_repeats_body_lines() {
        let body = b"2024-01-01T00:00:00Z\nAAAA\nBBBB";
        let received = parse_instant("2024-01-01T00:00:00.5Z").unwrap();
        let reply = build_reply(body, &received, None).unwrap();
        assert_eq!(
            reply,
            b"2024-01-01T00:00:00Z\n2024-01-01T00:00:00.500Z\nAAAA\nBBBB\n".to_vec()
        );
    }

    #[test]
    fn echo_reply_without_body_lines() {
        let reply = build_reply(b"2024-01-01T00:00:00Z", &instant(), None).unwrap();
        assert_eq!(reply, b"2024-01-01T00:00:00Z\n2024-01-01T00:00:00Z\n".to_vec());
    }

    #[test]
    fn fixed_size_reply() {
        let reply = build_reply(b"2024-01-01T00:00:00Z\nAAAA", &instant(), Some(40)).unwrap();
        let text = String::from_utf8(reply).unwrap();
        let lines: Vec<_> = text.split('\n').collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[2], "");
        assert_eq!(STANDARD.decode(lines[3]).unwrap().len(), 30);
    }

    #[test]
    fn malformed_request_gets_no_reply() {
        assert!(matches!(
            build_reply(b"hello\nworld", &instant(), None),
            Err(FrameError::BadInstant(_))
        ));
        assert!(build_reply(b"", &instant(), None).is_err());
    }

    #[test]
    fn receipt_is_second_line() {
        let t = parse_server_received(b"2024-01-01T00:00:00Z\n2024-01-01T00:00:01Z\n").unwrap();
        assert_eq!(format_instant(&t), "2024-01-01T00:00:01Z");
        assert!(matches!(
            parse_server_received(b"2024-01-01T00:00:00Z"),
            Err(FrameError::MissingReceipt)
        ));
        assert!(matches!(
            parse_server_received(b"a\nb\n"),
            Err(FrameError::BadReceipt { .. })
        ));
    }
}
