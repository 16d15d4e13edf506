//! Process-wide SPBM session cache.
//!
//! Sessions are keyed by server URL so controllers sharing a vCenter reuse
//! one authenticated client. An optional keep-alive task pings the endpoint
//! between reconciles so idle sessions are not expired server-side. `clear`
//! runs at shutdown.

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::PbmClient;

struct Session {
    client: PbmClient,
    keep_alive: Option<JoinHandle<()>>,
}

static SESSIONS: Lazy<Mutex<HashMap<String, Session>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Default idle interval between keep-alive pings.
pub const DEFAULT_KEEP_ALIVE_DURATION: Duration = Duration::from_secs(5 * 60);

/// Register a session for `server`, replacing any previous one.
///
/// When `keep_alive` is set, a background task pings the endpoint at that
/// interval until the session is cleared.
pub fn insert(server: &str, client: PbmClient, keep_alive: Option<Duration>) {
    let handle = keep_alive.map(|interval| {
        let ping_client = client.clone();
        let server = server.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                if let Err(e) = ping_client.ping().await {
                    warn!("keep-alive ping for {} failed: {}", server, e);
                }
            }
        })
    });

    let mut sessions = SESSIONS.lock();
    if let Some(old) = sessions.insert(
        server.to_string(),
        Session {
            client,
            keep_alive: handle,
        },
    ) {
        if let Some(h) = old.keep_alive {
            h.abort();
        }
    }
    debug!("registered SPBM session for {}", server);
}

/// Fetch the cached session for `server`, if any.
pub fn get(server: &str) -> Option<PbmClient> {
    SESSIONS.lock().get(server).map(|s| s.client.clone())
}

/// Drop every cached session and stop their keep-alive tasks.
pub fn clear() {
    let mut sessions = SESSIONS.lock();
    for (server, session) in sessions.drain() {
        if let Some(h) = session.keep_alive {
            h.abort();
        }
        debug!("cleared SPBM session for {}", server);
    }
}
