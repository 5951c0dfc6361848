/**
 * STALENESS SWEEP - Dead-man's switch
 *
 * Les heartbeats sont poussés par les agents : l'absence de rapport ne peut
 * pas déclencher de changement d'état à elle seule. Le sweep périodique est le
 * seul chemin qui fait passer un hôte offline.
 *
 * Source de vérité : `StatusRecord.last_seen`, écrit sous le verrou de l'hôte
 * en même temps que la mesure acceptée.
 */

use crate::state::HostLocks;
use crate::store::{StatusStore, Storage, StoreError};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{error, info};

/// Au-delà de ce silence un hôte est considéré offline (~3-4 intervalles de rapport)
pub const OFFLINE_THRESHOLD: Duration = Duration::seconds(35);

pub fn is_stale(last_seen: OffsetDateTime, now: OffsetDateTime) -> bool {
    now - last_seen > OFFLINE_THRESHOLD
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub demoted: Vec<String>,
    pub failed: Vec<String>,
}

pub struct StalenessSweep {
    store: Arc<dyn Storage>,
    locks: HostLocks,
}

impl StalenessSweep {
    pub fn new(store: Arc<dyn Storage>, locks: HostLocks) -> Self {
        Self { store, locks }
    }

    /// Passe de démotion. Une erreur sur un hôte n'arrête pas les autres.
    pub fn run(&self, now: OffsetDateTime) -> SweepReport {
        let mut report = SweepReport::default();

        let statuses = match self.store.list_statuses() {
            Ok(s) => s,
            Err(e) => {
                error!("[sweep] failed to list statuses: {}", e);
                return report;
            }
        };

        for status in statuses.into_iter().filter(|s| s.is_online) {
            if !is_stale(status.last_seen, now) {
                continue;
            }
            match self.demote_if_stale(&status.host_id, now) {
                Ok(true) => report.demoted.push(status.host_id),
                Ok(false) => {}
                Err(e) => {
                    error!("[sweep] failed to demote host {}: {}", status.host_id, e);
                    report.failed.push(status.host_id);
                }
            }
        }

        report
    }

    /// Re-vérifie sous verrou : un heartbeat a pu arriver entre la liste et ici
    fn demote_if_stale(&self, host_id: &str, now: OffsetDateTime) -> Result<bool, StoreError> {
        let lock = self.locks.for_host(host_id);
        let _guard = lock.lock();

        let Some(status) = self.store.get_status(host_id)? else {
            return Ok(false);
        };
        if !status.is_online || !is_stale(status.last_seen, now) {
            return Ok(false);
        }

        self.store.upsert_status(host_id, false, status.last_seen)?;
        info!(
            "[sweep] host {} marked offline (silent for {}s)",
            host_id,
            (now - status.last_seen).whole_seconds()
        );
        Ok(true)
    }
}
