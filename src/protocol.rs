//! Identification protocol (RFC 1413) query parser and response generator.
//!
//! Request:  `<local-port> , <remote-port>\r\n`
//! Response: `<local-port> , <remote-port> : USERID : UNIX : <user>\n`
//!       or: `<local-port> , <remote-port> : ERROR : <error-kind>\n`

use bytes::BytesMut;
use std::num::IntErrorKind;
use std::str;

/// Operating system token reported in USERID responses
pub const OPSYS: &str = "UNIX";

/// Bytes stripped from the end of a raw query before parsing
const TRAILING_PADDING: &[u8] = b"\r\n\0";

/// A validated port pair.
///
/// The trimmed client text is kept so responses echo ports back exactly
/// as the client wrote them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub local_port: u16,
    pub remote_port: u16,
    local_text: String,
    remote_text: String,
}

impl Query {
    /// The `<lp> , <rp>` prefix used in every non-INVALID-PORT reply.
    pub fn ports(&self) -> String {
        format!("{} , {}", self.local_text, self.remote_text)
    }
}

/// Reasons a query is rejected. All of them are answered with INVALID-PORT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Query is not valid UTF-8
    Encoding,
    /// Query did not contain exactly two comma-separated fields
    FieldCount(usize),
    /// Field is not a decimal number
    NotNumber(String),
    /// Field is a number outside 0..=65535
    OutOfRange(String),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::Encoding => write!(f, "query is not valid UTF-8"),
            QueryError::FieldCount(n) => write!(f, "expected 2 fields, got {}", n),
            QueryError::NotNumber(s) => write!(f, "not a decimal port: {:?}", s),
            QueryError::OutOfRange(s) => write!(f, "port out of range: {}", s),
        }
    }
}

impl std::error::Error for QueryError {}

/// Protocol error codes this responder emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidPort,
    NoUser,
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidPort => "INVALID-PORT",
            ErrorKind::NoUser => "NO-USER",
            ErrorKind::UnknownError => "UNKNOWN-ERROR",
        }
    }
}

/// Strip trailing CR/LF/NUL padding from a raw read.
pub fn trim_request(raw: &[u8]) -> &[u8] {
    let end = raw
        .iter()
        .rposition(|b| !TRAILING_PADDING.contains(b))
        .map_or(0, |pos| pos + 1);
    &raw[..end]
}

/// Parse a raw query line into a validated port pair.
pub fn parse_query(raw: &[u8]) -> Result<Query, QueryError> {
    let line = str::from_utf8(trim_request(raw)).map_err(|_| QueryError::Encoding)?;

    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 2 {
        return Err(QueryError::FieldCount(fields.len()));
    }

    let local_text = fields[0].trim_matches(' ');
    let remote_text = fields[1].trim_matches(' ');

    Ok(Query {
        local_port: parse_port(local_text)?,
        remote_port: parse_port(remote_text)?,
        local_text: local_text.to_string(),
        remote_text: remote_text.to_string(),
    })
}

fn parse_port(field: &str) -> Result<u16, QueryError> {
    // u16::from_str would accept a leading '+'
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(QueryError::NotNumber(field.to_string()));
    }

    field.parse::<u16>().map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow => QueryError::OutOfRange(field.to_string()),
        _ => QueryError::NotNumber(field.to_string()),
    })
}

/// Response line generator
pub struct Response;

impl Response {
    /// Generate the INVALID-PORT response. Always reports ports `0 , 0`.
    pub fn invalid_port() -> BytesMut {
        let mut response = BytesMut::new();
        response.extend_from_slice(
            format!("0 , 0 : ERROR : {}\n", ErrorKind::InvalidPort.as_str()).as_bytes(),
        );
        response
    }

    /// Generate an ERROR response echoing the query's ports
    pub fn error(query: &Query, kind: ErrorKind) -> BytesMut {
        let mut response = BytesMut::new();
        response.extend_from_slice(
            format!("{} : ERROR : {}\n", query.ports(), kind.as_str()).as_bytes(),
        );
        response
    }

    /// Generate a USERID response
    pub fn userid(query: &Query, username: &str) -> BytesMut {
        let mut response = BytesMut::new();
        response.extend_from_slice(
            format!("{} : USERID : {} : {}\n", query.ports(), OPSYS, username).as_bytes(),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query() {
        let query = parse_query(b"80 , 12345\r\n").unwrap();
        assert_eq!(query.local_port, 80);
        assert_eq!(query.remote_port, 12345);
        assert_eq!(query.ports(), "80 , 12345");
    }

    #[test]
    fn test_parse_query_without_spaces() {
        let query = parse_query(b"6193,23\n").unwrap();
        assert_eq!(query.local_port, 6193);
        assert_eq!(query.remote_port, 23);
        assert_eq!(query.ports(), "6193 , 23");
    }

    #[test]
    fn test_parse_query_nul_padding() {
        let query = parse_query(b"1,2\r\n\0\0\0\0").unwrap();
        assert_eq!((query.local_port, query.remote_port), (1, 2));
    }

    #[test]
    fn test_parse_query_bounds() {
        let query = parse_query(b"0,65535").unwrap();
        assert_eq!((query.local_port, query.remote_port), (0, 65535));

        assert_eq!(
            parse_query(b"99999,1"),
            Err(QueryError::OutOfRange("99999".to_string()))
        );
        assert_eq!(
            parse_query(b"1,65536"),
            Err(QueryError::OutOfRange("65536".to_string()))
        );
    }

    #[test]
    fn test_parse_query_field_count() {
        assert_eq!(parse_query(b"80\r\n"), Err(QueryError::FieldCount(1)));
        assert_eq!(parse_query(b"1,2,3\r\n"), Err(QueryError::FieldCount(3)));
        assert_eq!(parse_query(b""), Err(QueryError::FieldCount(1)));
    }

    #[test]
    fn test_parse_query_not_number() {
        assert!(matches!(parse_query(b"abc,1"), Err(QueryError::NotNumber(_))));
        assert!(matches!(parse_query(b"1,"), Err(QueryError::NotNumber(_))));
        assert!(matches!(parse_query(b"-1,1"), Err(QueryError::NotNumber(_))));
        assert!(matches!(parse_query(b"+1,1"), Err(QueryError::NotNumber(_))));
        assert!(matches!(parse_query(b"1 2,3"), Err(QueryError::NotNumber(_))));
    }

    #[test]
    fn test_leading_line_ending_is_not_stripped() {
        assert!(matches!(
            parse_query(b"\r\n80,1\r\n"),
            Err(QueryError::NotNumber(_))
        ));
        assert_eq!(trim_request(b"\0\r\n80,1\r\n"), b"\0\r\n80,1");
    }

    #[test]
    fn test_parse_query_invalid_utf8() {
        assert_eq!(parse_query(b"\xff,1"), Err(QueryError::Encoding));
    }

    #[test]
    fn test_echo_preserves_client_text() {
        let query = parse_query(b"  080  ,  0023 \r\n").unwrap();
        assert_eq!(query.local_port, 80);
        assert_eq!(query.ports(), "080 , 0023");
    }

    #[test]
    fn test_trim_request() {
        assert_eq!(trim_request(b"1,2\r\n\0"), b"1,2");
        assert_eq!(trim_request(b"\r\n\0"), b"");
        assert_eq!(trim_request(b"1,2"), b"1,2");
    }

    #[test]
    fn test_responses() {
        let query = parse_query(b"80 , 12345").unwrap();

        assert_eq!(&Response::invalid_port()[..], b"0 , 0 : ERROR : INVALID-PORT\n");
        assert_eq!(
            &Response::error(&query, ErrorKind::NoUser)[..],
            b"80 , 12345 : ERROR : NO-USER\n"
        );
        assert_eq!(
            &Response::error(&query, ErrorKind::UnknownError)[..],
            b"80 , 12345 : ERROR : UNKNOWN-ERROR\n"
        );
        assert_eq!(
            &Response::userid(&query, "alice")[..],
            b"80 , 12345 : USERID : UNIX : alice\n"
        );
    }
}
