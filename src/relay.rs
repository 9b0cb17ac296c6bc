use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Per-direction read buffer size
pub const RELAY_BUFFER_SIZE: usize = 16_384;

/// Error type for relay setup
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to forward initial payload: {0}")]
    InitialPayload(#[source] io::Error),
}

/// Which side ended the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedBy {
    Client,
    Server,
    Error(io::ErrorKind),
}

/// Byte counts of a finished relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub from_client: u64,
    pub from_server: u64,
    pub closed_by: ClosedBy,
}

/// Connect to `target` and relay `client` to it until either side closes.
///
/// If the connect fails the client socket is dropped (closed) and nothing is
/// relayed.
pub async fn relay(
    client: TcpStream,
    target: (&str, u16),
    initial: Option<&[u8]>,
) -> Result<RelayStats, RelayError> {
    let server = match TcpStream::connect(target).await {
        Ok(stream) => stream,
        Err(source) => {
            drop(client);
            return Err(RelayError::Connect {
                target: format!("{}:{}", target.0, target.1),
                source,
            });
        }
    };

    relay_streams(client, server, initial).await
}

/// Forward bytes in both directions between two established streams.
///
/// `initial` is written to the server before anything else. Each direction
/// runs its own copy loop so a blocked write on one side never stops reads
/// on the other. The relay ends on the first zero-length read or
/// unrecoverable error in either direction, after which both streams are
/// shut down. `Interrupted` and `WouldBlock` are retried.
pub async fn relay_streams<C, S>(
    mut client: C,
    mut server: S,
    initial: Option<&[u8]>,
) -> Result<RelayStats, RelayError>
where
    C: AsyncRead + AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Some(payload) = initial.filter(|p| !p.is_empty()) {
        if let Err(e) = server.write_all(payload).await {
            let _ = server.shutdown().await;
            let _ = client.shutdown().await;
            return Err(RelayError::InitialPayload(e));
        }
    }

    let mut from_client = payload_len(initial);
    let mut from_server = 0u64;

    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut server_rd, mut server_wr) = tokio::io::split(server);

    let closed_by = {
        let upstream = pump(&mut client_rd, &mut server_wr, &mut from_client, ClosedBy::Client);
        let downstream = pump(&mut server_rd, &mut client_wr, &mut from_server, ClosedBy::Server);
        tokio::select! {
            closed = upstream => closed,
            closed = downstream => closed,
        }
    };

    if let Err(e) = server_wr.shutdown().await {
        debug!("Server shutdown error: {}", e);
    }
    if let Err(e) = client_wr.shutdown().await {
        debug!("Client shutdown error: {}", e);
    }

    Ok(RelayStats {
        from_client,
        from_server,
        closed_by,
    })
}

/// Copy one direction until EOF or a hard error, counting forwarded bytes
async fn pump<R, W>(reader: &mut R, writer: &mut W, forwarded: &mut u64, on_eof: ClosedBy) -> ClosedBy
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => return on_eof,
            Ok(n) => {
                if let Err(e) = writer.write_all(&buf[..n]).await {
                    return ClosedBy::Error(e.kind());
                }
                *forwarded += n as u64;
            }
            Err(e) if is_transient(&e) => continue,
            Err(e) => return ClosedBy::Error(e.kind()),
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
}

fn payload_len(initial: Option<&[u8]>) -> u64 {
    initial.map_or(0, |p| p.len() as u64)
}
