//! Network reachability as process-wide state.
//!
//! [`ConnectivityMonitor`] owns the online flag. Nothing else writes it: a
//! platform source (here, [`ReachabilityProbe`]) feeds observations in through
//! [`ConnectivityMonitor::report`], and every other component only reads it
//! via [`ConnectivityMonitor::is_online`] or listens for transitions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct ConnectivityMonitor {
    online: AtomicBool,
    transitions: broadcast::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (transitions, _) = broadcast::channel(16);
        Self {
            online: AtomicBool::new(initially_online),
            transitions,
        }
    }

    /// Point-in-time reachability.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Subscribe to transitions. Fires once per change, never per observation.
    ///
    /// The current state is not replayed to new subscribers; call
    /// [`is_online`](Self::is_online) once after subscribing.
    pub fn subscribe(&self) -> broadcast::Receiver<bool> {
        self.transitions.subscribe()
    }

    /// Record an observation from a reachability source.
    ///
    /// Returns `true` if it changed the state, in which case subscribers are
    /// notified. Never blocks.
    pub fn report(&self, online: bool) -> bool {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return false;
        }

        if online {
            log::info!("Network: online");
        } else {
            log::warn!("Network: offline");
        }
        let _ = self.transitions.send(online);
        true
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Reachability source for native processes: periodically opens a TCP
/// connection to the remote API and reports the outcome.
#[derive(Debug, Clone)]
pub struct ReachabilityProbe {
    target: String,
    interval: Duration,
    timeout: Duration,
}

impl ReachabilityProbe {
    /// `target` is a `host:port` pair.
    pub fn new(target: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            interval,
            timeout,
        }
    }

    /// Derive the `host:port` target from an HTTP(S) base URL.
    pub fn for_url(url: &reqwest::Url, interval: Duration, timeout: Duration) -> Option<Self> {
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(Self::new(format!("{host}:{port}"), interval, timeout))
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Probe once and report the result to `monitor`. Returns the observed state.
    pub async fn probe_once(&self, monitor: &ConnectivityMonitor) -> bool {
        let reachable = matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await,
            Ok(Ok(_))
        );
        log::trace!("Probe {} -> {}", self.target, reachable);
        monitor.report(reachable);
        reachable
    }

    /// Probe immediately, then every `interval`, until the handle is aborted.
    pub fn spawn(self, monitor: Arc<ConnectivityMonitor>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.probe_once(&monitor).await;
            }
        })
    }
}
