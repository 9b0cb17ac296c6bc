use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use crate::handler::ProxyContext;
use crate::registry::Host;

/// One display line for a host
pub fn render_host(host: &Host) -> String {
    if host.blacklisted {
        format!("[{}]Skipped {} (BLACKLISTED)", host.id, host.hostname)
    } else if host.scanned {
        format!("[{}]Done {} 100%", host.id, host.hostname)
    } else if !host.is_auditable() {
        format!("[{}]Direct {} (not audited)", host.id, host.hostname)
    } else {
        format!("[{}]Testing {} {}% done", host.id, host.hostname, host.progress)
    }
}

/// Hosts that are new in `current` or whose progress or scan state moved
pub fn changed_hosts<'a>(previous: &[Host], current: &'a [Host]) -> Vec<&'a Host> {
    current
        .iter()
        .filter(|host| match previous.get(host.id as usize) {
            Some(old) => old.progress != host.progress || old.scanned != host.scanned,
            None => true,
        })
        .collect()
}

/// Log a line for every host whose state changes, until the registry goes away
pub async fn run_status_view(mut updates: watch::Receiver<Vec<Host>>) {
    let mut previous: Vec<Host> = updates.borrow_and_update().clone();

    while updates.changed().await.is_ok() {
        let current = updates.borrow_and_update().clone();
        for host in changed_hosts(&previous, &current) {
            info!("{}", render_host(host));
        }
        previous = current;
    }
}

/// Periodically log connection and audit counts
pub async fn run_summary(ctx: Arc<ProxyContext>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // The first tick completes immediately
    interval.tick().await;
    let mut last = None;

    loop {
        interval.tick().await;

        let hosts = ctx.registry.snapshot();
        let scanned = hosts.iter().filter(|h| h.scanned).count();
        let auditing = ctx.launcher.running().await;
        let current = (ctx.connections.active(), ctx.connections.total(), hosts.len(), scanned, auditing);

        // Only log when something moved
        if last != Some(current) {
            info!(
                "Status - active connections: {} ({} total), hosts: {} ({} scanned), audits running: {}",
                current.0, current.1, current.2, current.3, current.4
            );
        }
        last = Some(current);
    }
}
