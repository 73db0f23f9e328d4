//! Kernel TCP connection table lookup.
//!
//! Scans a `/proc/net/tcp` style table for the socket whose local and
//! remote ports match a query and returns the uid that owns it:
//!
//! ```text
//!   sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
//!    0: 0100007F:0050 0100007F:3039 01 00000000:00000000 00:00000000 00000000  1000        0 4242 ...
//! ```
//!
//! Only ports are compared. An ident query carries no addresses, so when
//! several sockets share a port pair on different local addresses the
//! first row in table order wins.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{trace, warn};

use crate::protocol::ErrorKind;

/// Rows shorter than this end the scan.
const MIN_FIELDS: usize = 5;

const LOCAL_FIELD: usize = 1;
const REMOTE_FIELD: usize = 2;
const UID_FIELD: usize = 7;

/// Why a lookup produced no uid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupErrorKind {
    /// No row matched the port pair
    NoMatch,
    /// The table could not be opened or read
    Io,
    /// A row could not be parsed
    Parse,
}

/// Lookup failure with an optional diagnostic for the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupError {
    pub kind: LookupErrorKind,
    pub detail: Option<String>,
}

impl LookupError {
    fn no_match() -> Self {
        Self {
            kind: LookupErrorKind::NoMatch,
            detail: None,
        }
    }

    fn io(detail: impl ToString) -> Self {
        Self {
            kind: LookupErrorKind::Io,
            detail: Some(detail.to_string()),
        }
    }

    fn parse(detail: impl ToString) -> Self {
        Self {
            kind: LookupErrorKind::Parse,
            detail: Some(detail.to_string()),
        }
    }

    /// The protocol error code this failure is reported as.
    pub fn protocol_error(&self) -> ErrorKind {
        match self.kind {
            LookupErrorKind::NoMatch => ErrorKind::NoUser,
            LookupErrorKind::Io | LookupErrorKind::Parse => ErrorKind::UnknownError,
        }
    }
}

impl std::fmt::Display for LookupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let what = match self.kind {
            LookupErrorKind::NoMatch => "no matching connection",
            LookupErrorKind::Io => "connection table I/O error",
            LookupErrorKind::Parse => "connection table parse error",
        };
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", what, detail),
            None => write!(f, "{}", what),
        }
    }
}

impl std::error::Error for LookupError {}

/// Open the table at `path` and find the uid owning `local_port -> remote_port`.
///
/// The file is opened fresh for every call and closed before returning.
pub fn lookup_uid(path: &Path, local_port: u16, remote_port: u16) -> Result<u32, LookupError> {
    let file = File::open(path).map_err(|e| {
        warn!(path = %path.display(), error = %e, "Failed to open connection table");
        LookupError::io(e)
    })?;

    let result = scan_table(BufReader::new(file), local_port, remote_port);
    match &result {
        Err(e) if e.kind != LookupErrorKind::NoMatch => {
            warn!(path = %path.display(), error = %e, "Connection table lookup failed");
        }
        _ => {}
    }
    result
}

/// Scan a table snapshot for the first row matching the port pair.
pub fn scan_table<R: BufRead>(
    mut reader: R,
    local_port: u16,
    remote_port: u16,
) -> Result<u32, LookupError> {
    let local_hex = format!("{:04X}", local_port);
    let remote_hex = format!("{:04X}", remote_port);
    let mut line = String::new();

    // Column header
    reader.read_line(&mut line).map_err(LookupError::io)?;

    loop {
        line.clear();
        // A read error aborts the scan; later rows are never consulted
        if reader.read_line(&mut line).map_err(LookupError::io)? == 0 {
            return Err(LookupError::no_match());
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < MIN_FIELDS {
            trace!(line = line.trim_end(), "Short row, ending scan");
            return Err(LookupError::no_match());
        }

        let local = endpoint_port(fields[LOCAL_FIELD])?;
        let remote = endpoint_port(fields[REMOTE_FIELD])?;

        if local.eq_ignore_ascii_case(&local_hex) && remote.eq_ignore_ascii_case(&remote_hex) {
            let uid_field = fields
                .get(UID_FIELD)
                .ok_or_else(|| LookupError::parse("row has no uid column"))?;
            return uid_field
                .parse::<u32>()
                .map_err(|e| LookupError::parse(format!("uid {:?}: {}", uid_field, e)));
        }
    }
}

/// Port suffix of an `ADDRESS:PORT` hex endpoint.
fn endpoint_port(endpoint: &str) -> Result<&str, LookupError> {
    endpoint
        .rsplit_once(':')
        .map(|(_, port)| port)
        .ok_or_else(|| LookupError::parse(format!("malformed endpoint {:?}", endpoint)))
}
