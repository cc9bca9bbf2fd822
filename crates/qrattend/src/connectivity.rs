//! Network connectivity tracking.
//!
//! [`ConnectivityWatch`] holds the kiosk's belief about whether it is online
//! and publishes offline→online edges, which trigger queue flushes. The belief
//! is fed by a reachability probe against the endpoint host or set directly.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// How long a single reachability probe may take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Something that knows whether the network is currently reachable.
pub trait Connectivity: Send + Sync {
    /// Check if the network is currently believed reachable.
    fn is_online(&self) -> bool;
}

/// Connectivity that is always online.
///
/// Used when probing is disabled and for one-shot CLI commands that have
/// already checked the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Shared, observable online flag.
///
/// Cloning yields another handle onto the same flag.
#[derive(Debug, Clone)]
pub struct ConnectivityWatch {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityWatch {
    /// Create a watch with the given initial state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Create a watch seeded by one probe of `endpoint`.
    ///
    /// Without an endpoint nothing can be sent or flushed, so the watch
    /// starts online.
    pub async fn probed(endpoint: Option<&str>) -> Self {
        match endpoint {
            Some(url) => {
                let online = probe_endpoint(url).await;
                info!(online, "Initial connectivity check");
                Self::new(online)
            }
            None => Self::new(true),
        }
    }

    /// Record the current state. Only changes are published.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
    }

    /// Subscribe to offline→online edges.
    #[must_use]
    pub fn subscribe(&self) -> OnlineEvents {
        OnlineEvents {
            rx: self.tx.subscribe(),
        }
    }

    /// Probe `endpoint` every `interval` and feed the result into this watch.
    ///
    /// Endpoints without a resolvable host leave the state unchanged.
    #[must_use]
    pub fn spawn_probe(&self, endpoint: &str, interval: Duration) -> JoinHandle<()> {
        let watch = self.clone();
        let target = probe_target(endpoint);
        tokio::spawn(async move {
            let Some((host, port)) = target else {
                debug!("Endpoint has no host; connectivity probe disabled");
                return;
            };
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let online = probe(&host, port).await;
                trace!(%host, port, online, "Connectivity probe");
                watch.set_online(online);
            }
        })
    }
}

impl Connectivity for ConnectivityWatch {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Stream of "became online" edges.
#[derive(Debug)]
pub struct OnlineEvents {
    rx: watch::Receiver<bool>,
}

impl OnlineEvents {
    /// Wait for the next offline→online transition.
    ///
    /// Returns `false` once every [`ConnectivityWatch`] handle is dropped.
    pub async fn became_online(&mut self) -> bool {
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow_and_update() {
                return true;
            }
        }
        false
    }
}

/// Extract `(host, port)` from an endpoint URL.
#[must_use]
pub fn probe_target(endpoint: &str) -> Option<(String, u16)> {
    let url = reqwest::Url::parse(endpoint).ok()?;
    let host = url.host_str()?.to_string();
    let port = url.port_or_known_default()?;
    Some((host, port))
}

/// Check whether a TCP connection to `host:port` can be opened.
pub async fn probe(host: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// Probe the host behind `endpoint` once.
pub async fn probe_endpoint(endpoint: &str) -> bool {
    match probe_target(endpoint) {
        Some((host, port)) => probe(&host, port).await,
        None => false,
    }
}
