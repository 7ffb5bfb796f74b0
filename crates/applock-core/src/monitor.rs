//! Foreground-switch monitor.
//!
//! Turns the platform's stream of "app X is now in front" notifications into
//! challenge requests. The cheap in-memory filters (own package, challenge
//! surface, consecutive duplicates, grace period) run on the caller's thread;
//! the registry lookup may block on storage and runs on the blocking pool.
//!
//! Any registry read error is treated as "locked".

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::LockerConfig;
use crate::grace::GraceCache;
use crate::registry::LockRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeReason {
    Locked,
    /// The registry could not be read; failing closed.
    LookupFailed,
}

/// Signal to the presentation surface that `package_id` must be challenged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRequest {
    pub package_id: String,
    pub reason: ChallengeReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Empty,
    OwnPackage,
    ChallengeSurface,
    Duplicate,
    GracePeriod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Ignored(IgnoreReason),
    /// Passed every in-memory filter; the registry decides.
    NeedsLookup,
}

pub struct ForegroundMonitor {
    own_package_id: String,
    challenge_surface_marker: String,
    last_seen: Mutex<Option<String>>,
    grace: Arc<GraceCache>,
    registry: Arc<LockRegistry>,
}

impl ForegroundMonitor {
    pub fn new(config: &LockerConfig, grace: Arc<GraceCache>, registry: Arc<LockRegistry>) -> Self {
        Self {
            own_package_id: config.own_package_id.clone(),
            challenge_surface_marker: config.challenge_surface_marker.clone(),
            last_seen: Mutex::new(None),
            grace,
            registry,
        }
    }

    pub fn last_seen(&self) -> Option<String> {
        self.last_seen.lock().clone()
    }

    /// Forget the last foreground app, so the next event for it is checked
    /// again.
    pub fn reset(&self) {
        *self.last_seen.lock() = None;
    }

    fn is_own_surface(&self, package_id: &str) -> Option<IgnoreReason> {
        if package_id == self.own_package_id {
            return Some(IgnoreReason::OwnPackage);
        }
        if !self.challenge_surface_marker.is_empty()
            && package_id.contains(&self.challenge_surface_marker)
        {
            return Some(IgnoreReason::ChallengeSurface);
        }
        None
    }

    /// In-memory filtering of one event. Records the package as last seen
    /// unless it is the locker itself.
    pub fn observe(&self, package_id: &str) -> Observation {
        if package_id.is_empty() {
            return Observation::Ignored(IgnoreReason::Empty);
        }
        if let Some(reason) = self.is_own_surface(package_id) {
            return Observation::Ignored(reason);
        }
        {
            let mut last = self.last_seen.lock();
            if last.as_deref() == Some(package_id) {
                return Observation::Ignored(IgnoreReason::Duplicate);
            }
            *last = Some(package_id.to_string());
        }
        if self.grace.contains(package_id) {
            debug!(package = %package_id, "recently unlocked, not challenging");
            return Observation::Ignored(IgnoreReason::GracePeriod);
        }
        Observation::NeedsLookup
    }

    /// Registry lookup for a package that passed [`observe`](Self::observe).
    /// May block on storage.
    pub fn decide(&self, package_id: &str) -> Option<ChallengeRequest> {
        match self.registry.is_locked(package_id) {
            Ok(true) => {
                info!(package = %package_id, "locked app in foreground");
                Some(ChallengeRequest {
                    package_id: package_id.to_string(),
                    reason: ChallengeReason::Locked,
                })
            }
            Ok(false) => None,
            Err(err) => {
                warn!(package = %package_id, error = %err, "lock lookup failed, challenging");
                Some(ChallengeRequest {
                    package_id: package_id.to_string(),
                    reason: ChallengeReason::LookupFailed,
                })
            }
        }
    }

    /// Both stages on the calling thread.
    pub fn on_event(&self, package_id: &str) -> Option<ChallengeRequest> {
        match self.observe(package_id) {
            Observation::NeedsLookup => self.decide(package_id),
            Observation::Ignored(reason) => {
                trace!(package = %package_id, ?reason, "event ignored");
                None
            }
        }
    }
}

/// Run the monitor over an event channel.
///
/// Lookups for one package are chained so their decisions come out in the
/// order the events came in; lookups for different packages run
/// concurrently. The task ends when the event channel closes (after pending
/// lookups finish) or when `shutdown` turns `true`.
pub fn spawn_monitor(
    monitor: Arc<ForegroundMonitor>,
    mut events: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) -> (JoinHandle<()>, mpsc::UnboundedReceiver<ChallengeRequest>) {
    let (challenge_tx, challenge_rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        let mut lanes: HashMap<String, JoinHandle<()>> = HashMap::new();
        info!("foreground monitor started");

        loop {
            let package_id = tokio::select! {
                event = events.recv() => match event {
                    Some(id) => id,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("foreground monitor shutting down");
                        return;
                    }
                    continue;
                }
            };

            let Observation::NeedsLookup = monitor.observe(&package_id) else {
                continue;
            };

            let previous = lanes.remove(&package_id);
            let monitor = monitor.clone();
            let tx = challenge_tx.clone();
            let id = package_id.clone();
            let lane = tokio::spawn(async move {
                if let Some(previous) = previous {
                    let _ = previous.await;
                }
                let lookup_id = id.clone();
                let decision =
                    match tokio::task::spawn_blocking(move || monitor.decide(&lookup_id)).await {
                        Ok(decision) => decision,
                        Err(err) => {
                            warn!(package = %id, error = %err, "lookup task failed, challenging");
                            Some(ChallengeRequest {
                                package_id: id,
                                reason: ChallengeReason::LookupFailed,
                            })
                        }
                    };
                if let Some(request) = decision {
                    let _ = tx.send(request);
                }
            });
            lanes.insert(package_id, lane);
            lanes.retain(|_, lane| !lane.is_finished());
        }

        for (_, lane) in lanes.drain() {
            let _ = lane.await;
        }
        info!("foreground event stream ended");
    });

    (handle, challenge_rx)
}
