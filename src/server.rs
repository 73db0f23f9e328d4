//! TCP server for handling ident queries.
//!
//! Each accepted connection gets its own task which reads one query,
//! answers with exactly one line (or nothing, on a transport failure) and
//! closes the connection.

use crate::config::Config;
use crate::conntable::lookup_uid;
use crate::identity::{SystemUsers, UserDirectory};
use crate::protocol::{parse_query, ErrorKind, Query, Response};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

/// Query read buffer size. The longest valid query is 15 bytes.
const BUFFER_SIZE: usize = 64;

/// Listen backlog
const BACKLOG: i32 = 1024;

/// State shared (read-only) by every session
pub struct Session {
    table_path: PathBuf,
    read_timeout: Duration,
    users: Arc<dyn UserDirectory>,
}

impl Session {
    pub fn new(table_path: PathBuf, read_timeout: Duration, users: Arc<dyn UserDirectory>) -> Self {
        Session {
            table_path,
            read_timeout,
            users,
        }
    }
}

/// Server instance
pub struct Server {
    listen: SocketAddr,
    session: Arc<Session>,
}

impl Server {
    /// Create a new server answering from the host's user database
    pub fn new(config: Config) -> Self {
        Self::with_users(config, Arc::new(SystemUsers))
    }

    /// Create a new server with a custom user directory
    pub fn with_users(config: Config, users: Arc<dyn UserDirectory>) -> Self {
        Server {
            listen: config.listen,
            session: Arc::new(Session::new(config.table_path, config.read_timeout, users)),
        }
    }

    /// Bind the configured address and serve until interrupted
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = create_listener(self.listen).map_err(|e| {
            error!(address = %self.listen, error = %e, "Failed to bind");
            e
        })?;
        info!(address = %self.listen, "Server listening");

        self.serve(listener).await
    }

    /// Accept connections on `listener` until Ctrl-C
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(peer = %addr, "New connection");

                        let session = Arc::clone(&self.session);

                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, session).await {
                                debug!(peer = %addr, error = %e, "Connection error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
                _ = &mut shutdown => {
                    info!("Shutting down");
                    return Ok(());
                }
            }
        }
    }
}

/// Handle a single client connection.
///
/// Returns an error only for transport failures (timeout, read or write
/// error), in which case no response has been written.
pub async fn handle_connection<S>(mut stream: S, session: Arc<Session>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = [0u8; BUFFER_SIZE];

    let n = match tokio::time::timeout(session.read_timeout, stream.read(&mut buffer)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "no query before read deadline",
            ))
        }
    };

    if n == 0 {
        trace!("Connection closed by client");
        return Ok(());
    }

    let response = respond(&buffer[..n], &session).await;

    stream.write_all(&response).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Build the reply line for one raw query
async fn respond(raw: &[u8], session: &Arc<Session>) -> BytesMut {
    let query = match parse_query(raw) {
        Ok(query) => query,
        Err(e) => {
            debug!(error = %e, "Invalid query");
            return Response::invalid_port();
        }
    };

    trace!(
        local_port = query.local_port,
        remote_port = query.remote_port,
        "Resolving query"
    );

    let (local_port, remote_port) = (query.local_port, query.remote_port);
    let lookup_session = Arc::clone(session);
    let outcome = tokio::task::spawn_blocking(move || {
        resolve(
            &lookup_session.table_path,
            lookup_session.users.as_ref(),
            local_port,
            remote_port,
        )
    })
    .await
    .unwrap_or_else(|e| {
        warn!(error = %e, "Lookup task failed");
        Err(ErrorKind::UnknownError)
    });

    reply(&query, outcome)
}

/// Render a lookup outcome. Failures were already logged where detected.
fn reply(query: &Query, outcome: Result<String, ErrorKind>) -> BytesMut {
    match outcome {
        Ok(username) => {
            debug!(
                local_port = query.local_port,
                remote_port = query.remote_port,
                user = %username,
                "Resolved"
            );
            Response::userid(query, &username)
        }
        Err(kind) => Response::error(query, kind),
    }
}

/// Find the user owning `local_port -> remote_port`.
fn resolve(
    table_path: &Path,
    users: &dyn UserDirectory,
    local_port: u16,
    remote_port: u16,
) -> Result<String, ErrorKind> {
    let uid = lookup_uid(table_path, local_port, remote_port).map_err(|e| e.protocol_error())?;

    // A uid without a name is indistinguishable from no connection at all
    users.username(uid).map_err(|e| {
        warn!(uid, error = %e, "User lookup failed");
        ErrorKind::NoUser
    })
}

/// Create a TCP listener with SO_REUSEADDR so restarts can rebind at once.
fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    TcpListener::from_std(socket.into())
}
