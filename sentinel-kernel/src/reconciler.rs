/**
 * TRANSITION RECONCILER - Pilote le registre des pannes, une fois par front
 *
 * RÔLE :
 * Pour chaque hôte, compare le flag `is_online` courant avec l'existence d'une
 * panne active et en déduit exactement une action :
 *   offline + pas de panne active  -> ouvrir une panne  (alerte "offline")
 *   online  + panne active         -> fermer la panne   (alerte "recovered")
 *   tout le reste                  -> rien
 *
 * FONCTIONNEMENT :
 * - Scan complet de tous les hôtes à chaque passe, aucune mémoire de transition :
 *   correct même après un redémarrage du process
 * - La branche "rien" rend les passes répétées idempotentes
 * - Les transitions retournées sont déjà committées ; les alertes partent après,
 *   hors verrou (voir monitor.rs)
 */

use crate::ledger::{OutageLedger, OFFLINE_CONTENT, OFFLINE_TITLE};
use crate::models::{Host, Outage};
use crate::state::HostLocks;
use crate::store::{HostStore, StatusStore, Storage, StoreError};
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Open,
    Close,
    Nothing,
}

pub fn decide(is_online: bool, active: Option<&Outage>) -> Decision {
    match (is_online, active) {
        (false, None) => Decision::Open,
        (true, Some(_)) => Decision::Close,
        _ => Decision::Nothing,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionKind {
    Offline,
    Recovered { downtime_seconds: i64 },
}

/// Front committé dans le registre, à annoncer
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub host_id: String,
    pub host_name: String,
    #[serde(flatten)]
    pub kind: TransitionKind,
    pub outage: Outage,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub transitions: Vec<Transition>,
    pub failed: Vec<String>,
}

pub struct TransitionReconciler {
    store: Arc<dyn Storage>,
    ledger: OutageLedger,
    locks: HostLocks,
}

impl TransitionReconciler {
    pub fn new(store: Arc<dyn Storage>, locks: HostLocks) -> Self {
        Self {
            ledger: OutageLedger::new(store.clone()),
            store,
            locks,
        }
    }

    pub fn ledger(&self) -> &OutageLedger {
        &self.ledger
    }

    /// Passe complète. Une erreur de persistance n'interrompt que l'hôte concerné.
    pub fn reconcile_all(&self, now: OffsetDateTime) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let hosts = match self.store.list_hosts() {
            Ok(h) => h,
            Err(e) => {
                error!("[reconcile] failed to list hosts: {}", e);
                return report;
            }
        };

        for host in &hosts {
            match self.reconcile_host(host, now) {
                Ok(Some(t)) => report.transitions.push(t),
                Ok(None) => {}
                Err(e) => {
                    error!("[reconcile] host {} skipped: {}", host.id, e);
                    report.failed.push(host.id.clone());
                }
            }
        }

        report
    }

    pub fn reconcile_host(
        &self,
        host: &Host,
        now: OffsetDateTime,
    ) -> Result<Option<Transition>, StoreError> {
        let lock = self.locks.for_host(&host.id);
        let _guard = lock.lock();

        // jamais rapporté : pas de front possible
        let Some(status) = self.store.get_status(&host.id)? else {
            return Ok(None);
        };
        let active = self.ledger.get_active(&host.id)?;

        match decide(status.is_online, active.as_ref()) {
            Decision::Open => {
                let outage = match self.ledger.open(&host.id, OFFLINE_TITLE, OFFLINE_CONTENT, now) {
                    Ok(o) => o,
                    // un autre écrivain a gagné la course : même résultat que "rien"
                    Err(StoreError::OutageAlreadyActive(_)) => return Ok(None),
                    Err(e) => return Err(e),
                };
                Ok(Some(Transition {
                    host_id: host.id.clone(),
                    host_name: host.name.clone(),
                    kind: TransitionKind::Offline,
                    outage,
                    at: now,
                }))
            }
            Decision::Close => {
                let Some(mut outage) = active else {
                    return Ok(None);
                };
                if !self.ledger.close(&outage.id, now)? {
                    return Ok(None);
                }
                let end = now.max(outage.start_time);
                outage.end_time = Some(end);
                Ok(Some(Transition {
                    host_id: host.id.clone(),
                    host_name: host.name.clone(),
                    kind: TransitionKind::Recovered {
                        downtime_seconds: (end - outage.start_time).whole_seconds(),
                    },
                    outage,
                    at: now,
                }))
            }
            Decision::Nothing => {
                debug!("[reconcile] host {} unchanged", host.id);
                Ok(None)
            }
        }
    }
}
