//! Catalog announcement (spec.md §5 "Shared state", §6 `-N`/`-E`/`-p`).
//!
//! The original engine drives this from a `SIGALRM` handler that performs
//! I/O directly. spec.md §9 flags that as a redesign target ("do not
//! perform I/O in a signal handler"); here the announcement is a
//! cooperative deadline the scheduler's main loop folds into its poll
//! budget instead, so the only thing a signal ever touches is the abort
//! `AtomicBool` in [`crate::scheduler::EngineContext`].

use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::dag::StateCounts;

/// What to announce and where to send it.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub project: String,
    pub port: u16,
    pub priority: i32,
    pub catalog_addr: String,
    pub period: Duration,
}

impl CatalogConfig {
    pub fn default_period() -> Duration {
        Duration::from_secs(300)
    }
}

/// A periodic UDP announcer. `tick` is cheap to call every loop iteration;
/// it only sends once `period` has elapsed since the last send.
pub struct Catalog {
    config: CatalogConfig,
    socket: Option<UdpSocket>,
    last_sent: Option<Instant>,
}

impl Catalog {
    pub async fn bind(config: CatalogConfig) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&config.catalog_addr).await?;
        Ok(Self { config, socket: Some(socket), last_sent: None })
    }

    /// How long until the next announcement is due; used by the caller to
    /// size its own poll deadline so the two cooperate instead of racing.
    pub fn time_until_due(&self, now: Instant) -> Duration {
        match self.last_sent {
            None => Duration::ZERO,
            Some(last) => self.config.period.saturating_sub(now.saturating_duration_since(last)),
        }
    }

    /// Send an announcement if the period has elapsed. No-op otherwise.
    pub async fn tick(&mut self, now: Instant, counts: StateCounts, total_nodes: usize) {
        if self.time_until_due(now) > Duration::ZERO {
            return;
        }
        self.last_sent = Some(now);

        let Some(socket) = &self.socket else { return };
        let payload = format!(
            "project {}\nport {}\npriority {}\ntotal {}\nwaiting {}\nrunning {}\ncomplete {}\nfailed {}\naborted {}\n",
            self.config.project,
            self.config.port,
            self.config.priority,
            total_nodes,
            counts.waiting,
            counts.running,
            counts.complete,
            counts.failed,
            counts.aborted,
        );

        match socket.send(payload.as_bytes()).await {
            Ok(_) => debug!(project = %self.config.project, "sent catalog update"),
            Err(e) => warn!(error = %e, "could not send catalog update"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_immediately_before_first_send() {
        let cfg = CatalogConfig {
            project: "p".into(),
            port: 9000,
            priority: 0,
            catalog_addr: "127.0.0.1:9097".into(),
            period: Duration::from_secs(300),
        };
        let catalog = Catalog { config: cfg, socket: None, last_sent: None };
        assert_eq!(catalog.time_until_due(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn not_due_immediately_after_a_send() {
        let cfg = CatalogConfig {
            project: "p".into(),
            port: 9000,
            priority: 0,
            catalog_addr: "127.0.0.1:9097".into(),
            period: Duration::from_secs(300),
        };
        let now = Instant::now();
        let catalog = Catalog { config: cfg, socket: None, last_sent: Some(now) };
        assert!(catalog.time_until_due(now) > Duration::ZERO);
    }
}
