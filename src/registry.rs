use std::collections::HashMap;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::blacklist::Blacklist;
use crate::request::is_valid_hostname;
use crate::routing::{self, Route};

pub type HostId = u32;

/// Per-destination audit state. One per distinct hostname, never removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub id: HostId,
    /// Exactly as the client wrote it
    pub hostname: String,
    /// `base_port + id`, or `None` once the port space is exhausted
    pub audit_port: Option<u16>,
    pub blacklisted: bool,
    pub valid_hostname: bool,
    /// Redirected connections expected before the audit completes
    pub expected_steps: u32,
    pub scanned: bool,
    /// 0..=100, forced to 100 when `scanned` is set
    pub progress: u8,
}

impl Host {
    /// Whether the audit tool may ever be started for this host
    pub fn is_auditable(&self) -> bool {
        !self.blacklisted && self.valid_hostname && self.audit_port.is_some()
    }

    /// True while tunnels to this host are redirected to its audit listener
    pub fn in_audit_window(&self) -> bool {
        self.is_auditable() && !self.scanned
    }
}

/// Static inputs used when a host is first seen
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub base_port: u16,
    pub expected_steps: u32,
    pub audit_host: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            base_port: 8443,
            expected_steps: 22,
            audit_host: "localhost".to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    hosts: Vec<Host>,
    by_name: HashMap<String, usize>,
    next_id: HostId,
}

/// Shared, append-only store of every host seen through a tunnel.
///
/// All reads-then-writes happen under one async mutex. Every mutation
/// publishes a fresh snapshot on a watch channel for read-only consumers.
pub struct HostRegistry {
    inner: Mutex<Inner>,
    blacklist: Blacklist,
    settings: RegistrySettings,
    updates: watch::Sender<Vec<Host>>,
}

impl HostRegistry {
    pub fn new(blacklist: Blacklist, settings: RegistrySettings) -> Self {
        let (updates, _) = watch::channel(Vec::new());
        Self {
            inner: Mutex::new(Inner::default()),
            blacklist,
            settings,
            updates,
        }
    }

    /// Return the host for `hostname`, creating it if this is first contact.
    ///
    /// The existence check and the insert share one critical section, so
    /// racing first contacts observe a single host and exactly one of them
    /// gets `created == true`.
    pub async fn lookup_or_create(&self, hostname: &str) -> (Host, bool) {
        let mut inner = self.inner.lock().await;

        if let Some(&idx) = inner.by_name.get(hostname) {
            return (inner.hosts[idx].clone(), false);
        }

        let id = inner.next_id;
        inner.next_id += 1;

        let audit_port = u16::try_from(u32::from(self.settings.base_port) + id).ok();
        let host = Host {
            id,
            hostname: hostname.to_string(),
            audit_port,
            blacklisted: self.blacklist.matches(hostname),
            valid_hostname: is_valid_hostname(hostname),
            expected_steps: self.settings.expected_steps,
            scanned: false,
            progress: 0,
        };

        if audit_port.is_none() {
            info!(
                "No audit port left for {} (base {} + id {}), routing directly",
                hostname, self.settings.base_port, id
            );
        }
        debug!(
            id = host.id,
            hostname = %host.hostname,
            blacklisted = host.blacklisted,
            valid = host.valid_hostname,
            "registered host"
        );

        let idx = inner.hosts.len();
        inner.hosts.push(host.clone());
        inner.by_name.insert(host.hostname.clone(), idx);
        self.publish(&inner);

        (host, true)
    }

    /// Route one tunnel to host `id`, advancing its progress if redirected
    pub async fn route(&self, id: HostId, requested_port: u16) -> Option<Route> {
        let mut inner = self.inner.lock().await;
        let host = inner.hosts.get_mut(id as usize)?;
        let route = routing::choose(host, requested_port, &self.settings.audit_host);
        if route.is_redirect() {
            self.publish(&inner);
        }
        Some(route)
    }

    /// Record that the audit tool for host `id` has returned
    pub async fn mark_scanned(&self, id: HostId) {
        let mut inner = self.inner.lock().await;
        if let Some(host) = inner.hosts.get_mut(id as usize) {
            host.scanned = true;
            host.progress = 100;
            self.publish(&inner);
        }
    }

    /// Immutable copy of every host in creation order
    pub fn snapshot(&self) -> Vec<Host> {
        self.updates.borrow().clone()
    }

    /// Receive a new snapshot after every registry change
    pub fn subscribe(&self) -> watch::Receiver<Vec<Host>> {
        self.updates.subscribe()
    }

    fn publish(&self, inner: &Inner) {
        self.updates.send_replace(inner.hosts.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn registry() -> HostRegistry {
        HostRegistry::new(
            Blacklist::from_lines(["corp.internal"]),
            RegistrySettings::default(),
        )
    }

    #[tokio::test]
    async fn test_sequential_ids_and_ports() {
        let registry = registry();

        let (a, created_a) = registry.lookup_or_create("a.example.com").await;
        let (b, created_b) = registry.lookup_or_create("b.example.com").await;

        assert!(created_a && created_b);
        assert_eq!((a.id, a.audit_port), (0, Some(8443)));
        assert_eq!((b.id, b.audit_port), (1, Some(8444)));
        assert!(!a.scanned);
        assert_eq!(a.progress, 0);
    }

    #[tokio::test]
    async fn test_lookup_existing_host() {
        let registry = registry();

        let (first, created) = registry.lookup_or_create("a.example.com").await;
        assert!(created);
        let (again, created) = registry.lookup_or_create("a.example.com").await;
        assert!(!created);
        assert_eq!(first, again);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_hostnames_are_exact() {
        let registry = registry();

        registry.lookup_or_create("example.com").await;
        let (_, created_upper) = registry.lookup_or_create("EXAMPLE.com").await;
        let (_, created_dot) = registry.lookup_or_create("example.com.").await;

        assert!(created_upper);
        assert!(created_dot);
        assert_eq!(registry.snapshot().len(), 3);
    }

    #[tokio::test]
    async fn test_blacklist_and_validity_computed_at_creation() {
        let registry = registry();

        let (corp, _) = registry.lookup_or_create("git.corp.internal").await;
        assert!(corp.blacklisted);
        assert!(!corp.is_auditable());

        let (bad, _) = registry.lookup_or_create("-bad.com").await;
        assert!(!bad.blacklisted);
        assert!(!bad.valid_hostname);
        assert!(!bad.is_auditable());

        let (good, _) = registry.lookup_or_create("good.example.com").await;
        assert!(good.in_audit_window());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_contact_creates_one_host() {
        for round in 0..20 {
            let registry = Arc::new(registry());
            let hostname = format!("race{}.example.com", round);

            let mut tasks = Vec::new();
            for _ in 0..16 {
                let registry = Arc::clone(&registry);
                let hostname = hostname.clone();
                tasks.push(tokio::spawn(async move {
                    registry.lookup_or_create(&hostname).await
                }));
            }

            let mut created = 0;
            let mut ports = HashSet::new();
            for task in tasks {
                let (host, was_created) = task.await.unwrap();
                if was_created {
                    created += 1;
                }
                ports.insert((host.id, host.audit_port));
            }

            assert_eq!(created, 1);
            assert_eq!(ports.len(), 1);
            assert_eq!(registry.snapshot().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_route_advances_progress() {
        let registry = registry();
        let (host, _) = registry.lookup_or_create("new.example.com").await;

        let route = registry.route(host.id, 443).await.unwrap();
        assert_eq!(
            route,
            Route::Audit {
                host: "localhost".to_string(),
                port: 8443
            }
        );
        assert_eq!(registry.snapshot()[0].progress, 4);

        assert!(registry.route(99, 443).await.is_none());
    }

    #[tokio::test]
    async fn test_mark_scanned_switches_to_direct() {
        let registry = registry();
        let (host, _) = registry.lookup_or_create("new.example.com").await;

        registry.route(host.id, 443).await;
        registry.mark_scanned(host.id).await;

        let snapshot = registry.snapshot();
        assert!(snapshot[0].scanned);
        assert_eq!(snapshot[0].progress, 100);

        let route = registry.route(host.id, 443).await.unwrap();
        assert_eq!(route, Route::direct("new.example.com", 443));
        assert_eq!(registry.snapshot()[0].progress, 100);
    }

    #[tokio::test]
    async fn test_port_space_exhaustion() {
        let registry = HostRegistry::new(
            Blacklist::empty(),
            RegistrySettings {
                base_port: u16::MAX,
                ..RegistrySettings::default()
            },
        );

        let (last, _) = registry.lookup_or_create("a.example.com").await;
        let (overflow, _) = registry.lookup_or_create("b.example.com").await;

        assert_eq!(last.audit_port, Some(u16::MAX));
        assert_eq!(overflow.audit_port, None);
        assert!(!overflow.is_auditable());
        assert!(!registry.route(overflow.id, 443).await.unwrap().is_redirect());
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let registry = registry();
        let mut updates = registry.subscribe();

        registry.lookup_or_create("a.example.com").await;
        updates.changed().await.unwrap();
        assert_eq!(updates.borrow_and_update().len(), 1);

        registry.mark_scanned(0).await;
        updates.changed().await.unwrap();
        assert!(updates.borrow_and_update()[0].scanned);
    }
}
