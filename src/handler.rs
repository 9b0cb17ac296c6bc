use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::audit::AuditLauncher;
use crate::connection::ConnectionTracker;
use crate::registry::HostRegistry;
use crate::relay::{relay, RelayError, RelayStats};
use crate::request::{parse_request, ParsedRequest, RequestKind};
use crate::routing::Route;

/// Reply sent to a client once its CONNECT has been accepted
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Upper bound of the first read used to classify a connection
pub const INITIAL_READ_SIZE: usize = 50_000;

/// Shared state handed to every connection task
pub struct ProxyContext {
    pub registry: Arc<HostRegistry>,
    pub launcher: Arc<AuditLauncher>,
    pub connections: Arc<ConnectionTracker>,
    /// Pause after starting an audit so its listener can bind
    pub warmup: Duration,
}

/// Accept clients forever, one task per connection
pub async fn serve(listener: TcpListener, ctx: Arc<ProxyContext>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(handle_connection(stream, peer, ctx));
            }
            Err(e) => {
                warn!("Accept error: {} (continuing)", e);
                continue;
            }
        }
    }
}

/// Classify one client connection and relay it to its destination.
///
/// Nothing is ever sent back for a request that cannot be parsed; the
/// connection is simply closed.
pub async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, ctx: Arc<ProxyContext>) {
    let guard = ctx.connections.track();
    let conn_id = guard.id();

    let mut initial = BytesMut::with_capacity(INITIAL_READ_SIZE);
    match stream.read_buf(&mut initial).await {
        Ok(0) => return,
        Ok(_) => {}
        Err(e) => {
            debug!("#{} read from {} failed: {}", conn_id, peer, e);
            return;
        }
    }
    let initial = initial.freeze();

    let request = match parse_request(&initial) {
        Ok(request) => request,
        Err(e) => {
            debug!("#{} dropping request from {}: {}", conn_id, peer, e);
            return;
        }
    };

    if let Some(result) = dispatch(stream, peer, conn_id, &request, &initial, &ctx).await {
        log_outcome(conn_id, &request, result);
    }
}

/// Forward an already parsed request. Returns `None` if the client left
/// before its tunnel was set up.
async fn dispatch(
    mut stream: TcpStream,
    peer: SocketAddr,
    conn_id: u64,
    request: &ParsedRequest,
    initial: &[u8],
    ctx: &ProxyContext,
) -> Option<Result<RelayStats, RelayError>> {
    let result = match request.kind {
        // Plain requests bypass the registry and are never audited
        RequestKind::PlainHttp => relay(stream, (request.host.as_str(), request.port), Some(initial)).await,
        RequestKind::Tunnel => {
            if let Err(e) = stream.write_all(CONNECTION_ESTABLISHED).await {
                debug!("#{} client {} went away before tunnel setup: {}", conn_id, peer, e);
                return None;
            }
            let route = route_tunnel(request, ctx).await;
            debug!("#{} {} -> {}", conn_id, request.host, route);
            relay(stream, route.addr(), None).await
        }
    };
    Some(result)
}

/// Register the tunnel's host, start its audit on first contact, and pick
/// where this tunnel goes
async fn route_tunnel(request: &ParsedRequest, ctx: &ProxyContext) -> Route {
    let (host, created) = ctx.registry.lookup_or_create(&request.host).await;
    if created && ctx.launcher.launch(&host).await {
        tokio::time::sleep(ctx.warmup).await;
    }

    ctx.registry
        .route(host.id, request.port)
        .await
        .unwrap_or_else(|| Route::direct(request.host.clone(), request.port))
}

fn log_outcome(conn_id: u64, request: &ParsedRequest, result: Result<RelayStats, RelayError>) {
    match result {
        Ok(stats) => debug!(
            "#{} {} {}:{} closed ({:?}): {}↑ {}↓ bytes",
            conn_id, request.kind, request.host, request.port, stats.closed_by, stats.from_client, stats.from_server
        ),
        Err(e) => debug!("#{} {} {}: {}", conn_id, request.kind, request.host, e),
    }
}
