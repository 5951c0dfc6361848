/**
 * MONITOR - Orchestration des deux producteurs de transitions
 *
 * FONCTIONNEMENT :
 * - Heartbeat : Validator -> écriture mesure + statut online (sous verrou hôte)
 *   -> Reconciler -> alertes
 * - Sweep périodique : Staleness Sweep -> Reconciler -> alertes
 *
 * Les alertes (HTTP) et l'event bus partent uniquement après commit du registre,
 * aucun verrou n'est tenu pendant l'envoi.
 */

use crate::models::{HeartbeatIn, Host, MetricSample};
use crate::mqtt::EventBus;
use crate::notify::Dispatcher;
use crate::reconciler::{ReconcileReport, Transition, TransitionReconciler};
use crate::state::{new_state, HostLocks, Shared};
use crate::store::{HostStore, SampleStore, StatusStore, Storage};
use crate::sweep::{StalenessSweep, SweepReport};
use crate::validator::{HeartbeatValidator, IngestError};
use std::net::IpAddr;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::task;
use tracing::{debug, info, warn};

/// Résultat d'une passe sweep + réconciliation
#[derive(Debug, Default)]
pub struct CheckReport {
    pub sweep: SweepReport,
    pub reconcile: ReconcileReport,
    pub notified: usize,
}

pub struct Monitor {
    store: Arc<dyn Storage>,
    locks: HostLocks,
    validator: HeartbeatValidator,
    sweep: StalenessSweep,
    reconciler: TransitionReconciler,
    dispatcher: Dispatcher,
    events: Option<EventBus>,
    last_sweep: Shared<Option<OffsetDateTime>>,
}

impl Monitor {
    pub fn new(store: Arc<dyn Storage>, dispatcher: Dispatcher) -> Self {
        let locks = HostLocks::new();
        Self {
            validator: HeartbeatValidator::new(store.clone()),
            sweep: StalenessSweep::new(store.clone(), locks.clone()),
            reconciler: TransitionReconciler::new(store.clone(), locks.clone()),
            store,
            locks,
            dispatcher,
            events: None,
            last_sweep: new_state(None),
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &Arc<dyn Storage> {
        &self.store
    }

    pub fn reconciler(&self) -> &TransitionReconciler {
        &self.reconciler
    }

    pub fn notifications_enabled(&self) -> bool {
        self.dispatcher.is_enabled()
    }

    pub fn last_sweep(&self) -> Option<OffsetDateTime> {
        *self.last_sweep.lock()
    }

    /// Valide le rapport puis écrit statut online + mesure + snapshot matériel.
    /// En cas de rejet ou d'échec d'écriture du statut, rien n'est écrit.
    pub fn ingest(
        &self,
        report: &HeartbeatIn,
        source: IpAddr,
        now: OffsetDateTime,
    ) -> Result<Host, IngestError> {
        if report.server_id.is_empty() || report.secret.is_empty() {
            return Err(IngestError::Invalid("server_id and secret are required".into()));
        }

        let host = self.validator.validate(&report.server_id, &report.secret, source)?;

        let lock = self.locks.for_host(&host.id);
        let _guard = lock.lock();

        // statut d'abord : s'il échoue, aucune mesure n'est enregistrée
        // et le rapport peut être renvoyé sans doublon
        let status = self.store.upsert_status(&host.id, true, now)?;
        self.store.append_sample(&MetricSample {
            host_id: host.id.clone(),
            timestamp: now,
            metrics: report.metrics.clone(),
        })?;
        if let Some(hw) = &report.static_info {
            self.store.update_hardware(&host.id, hw)?;
        }

        debug!("[monitor] heartbeat accepted from {} (last_seen {})", host.id, status.last_seen);
        Ok(host)
    }

    /// Réconciliation seule (après un heartbeat) puis annonce des fronts
    pub async fn reconcile_and_notify(&self, now: OffsetDateTime) -> ReconcileReport {
        let report = self.reconciler.reconcile_all(now);
        self.announce(&report.transitions).await;
        report
    }

    /// Passe complète du dead-man's switch
    pub async fn check_and_notify(&self, now: OffsetDateTime) -> CheckReport {
        let sweep = self.sweep.run(now);
        *self.last_sweep.lock() = Some(now);
        let reconcile = self.reconciler.reconcile_all(now);
        let notified = self.announce(&reconcile.transitions).await;

        if !sweep.demoted.is_empty() || !reconcile.transitions.is_empty() {
            info!(
                "[monitor] sweep demoted {} host(s), {} transition(s), {} alert(s) delivered",
                sweep.demoted.len(),
                reconcile.transitions.len(),
                notified
            );
        }

        CheckReport {
            sweep,
            reconcile,
            notified,
        }
    }

    /// Envoie les alertes des fronts committés. Retourne le nombre d'alertes livrées.
    pub async fn announce(&self, transitions: &[Transition]) -> usize {
        let mut delivered = 0;
        for t in transitions {
            if let Some(events) = &self.events {
                events.publish_transition(t);
            }
            if self.dispatcher.notify(t).await {
                delivered += 1;
            }
        }
        delivered
    }
}

/// Sweep périodique. Un tick en retard est rattrapé sans rafale.
pub fn spawn_sweep_loop(monitor: Arc<Monitor>, every: std::time::Duration) {
    info!("[monitor] starting staleness sweep (every {}s)", every.as_secs());

    task::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let report = monitor.check_and_notify(OffsetDateTime::now_utc()).await;
            if !report.sweep.failed.is_empty() || !report.reconcile.failed.is_empty() {
                warn!(
                    "[monitor] pass finished with failures: sweep {:?}, reconcile {:?}",
                    report.sweep.failed, report.reconcile.failed
                );
            }
        }
    });
}
