//! vCenter credentials loading and rotation.
//!
//! Credentials are mounted from a secret as a YAML file. The manager loads
//! them at startup and watches the file so a rotated secret takes effect
//! without a restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Credentials for a vCenter endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Parse a credentials file, rejecting empty fields.
pub fn load(path: &Path) -> Result<Credentials> {
    let raw = std::fs::read_to_string(path).map_err(|err| Error::Credentials {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    let creds: Credentials = serde_yaml::from_str(&raw).map_err(|err| Error::Credentials {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    if creds.username.is_empty() || creds.password.is_empty() {
        return Err(Error::Credentials {
            path: path.display().to_string(),
            reason: "username and password must both be set".to_string(),
        });
    }
    Ok(creds)
}

/// Watches a credentials file and keeps the latest parsed value available.
pub struct CredentialsWatch {
    path: PathBuf,
    current: Arc<RwLock<Credentials>>,
    watcher: Option<RecommendedWatcher>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl CredentialsWatch {
    /// Load the file once and start watching it for changes.
    pub fn start(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let current = Arc::new(RwLock::new(load(&path)?));

        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |event| {
            let _ = tx.send(event);
        })?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        let slot = Arc::clone(&current);
        let watched = path.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    Ok(_) => reload(&watched, &slot),
                    Err(err) => warn!("credentials watch error on {:?}: {}", watched, err),
                }
            }
        });

        Ok(Self {
            path,
            current,
            watcher: Some(watcher),
            task: Some(task),
        })
    }

    /// Latest successfully parsed credentials.
    pub fn current(&self) -> Credentials {
        self.current.read().clone()
    }

    /// Re-read the file immediately, keeping the previous value on failure.
    pub fn reload(&self) {
        reload(&self.path, &self.current);
    }

    /// Stop watching. Idempotent; also invoked on drop.
    pub fn close(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            let _ = watcher.unwatch(&self.path);
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for CredentialsWatch {
    fn drop(&mut self) {
        self.close();
    }
}

fn reload(path: &Path, slot: &RwLock<Credentials>) {
    match load(path) {
        Ok(creds) => {
            let mut guard = slot.write();
            if *guard != creds {
                info!("credentials rotated, reloaded from {:?}", path);
                *guard = creds;
            }
        }
        // A rotation writes the file non-atomically in some mounts; keep the
        // last good value and wait for the next event.
        Err(err) => warn!("credentials reload from {:?} failed: {}", path, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_parses_yaml() {
        let path = write_temp(
            "creds-ok.yaml",
            "username: administrator@vsphere.local\npassword: hunter2\n",
        );
        let creds = load(&path).unwrap();
        assert_eq!(creds.username, "administrator@vsphere.local");
        assert_eq!(creds.password, "hunter2");
    }

    #[test]
    fn test_load_rejects_empty_fields() {
        let path = write_temp("creds-empty.yaml", "username: \"\"\npassword: x\n");
        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("username and password"));
    }

    #[test]
    fn test_load_missing_file_is_a_credentials_error() {
        let err = load(Path::new("/nonexistent/credentials.yaml")).unwrap_err();
        assert!(matches!(err, Error::Credentials { .. }));
    }

    #[test]
    fn test_load_malformed_yaml_is_a_credentials_error() {
        let path = write_temp("creds-malformed.yaml", "{not yaml");
        let err = load(&path).unwrap_err();
        assert!(matches!(err, Error::Credentials { .. }));
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_contents() {
        let path = write_temp("creds-rotate.yaml", "username: a\npassword: b\n");
        let mut watch = CredentialsWatch::start(&path).unwrap();
        assert_eq!(watch.current().username, "a");

        std::fs::write(&path, "username: c\npassword: d\n").unwrap();
        watch.reload();
        assert_eq!(watch.current().username, "c");

        watch.close();
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_last_good_value() {
        let path = write_temp("creds-bad-rotate.yaml", "username: a\npassword: b\n");
        let watch = CredentialsWatch::start(&path).unwrap();

        std::fs::write(&path, "{not yaml").unwrap();
        watch.reload();
        assert_eq!(watch.current().password, "b");
    }
}
