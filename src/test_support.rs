use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::registry::{HostId, HostRegistry};

/// Write an executable `/bin/sh` script standing in for the audit tool
#[cfg(unix)]
pub fn fake_tool(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-audit-tool");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write fake tool");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod fake tool");
    path
}

/// Block until host `id` is marked scanned, failing the test after 10s
pub async fn wait_until_scanned(registry: &HostRegistry, id: HostId) {
    let mut updates = registry.subscribe();
    let scanned = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if updates
                .borrow_and_update()
                .iter()
                .any(|host| host.id == id && host.scanned)
            {
                return true;
            }
            if updates.changed().await.is_err() {
                return false;
            }
        }
    })
    .await;

    assert_eq!(scanned, Ok(true), "host {} was not marked scanned in time", id);
}
