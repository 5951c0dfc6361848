/**
 * STORE - Interface de persistance consommée par le kernel
 *
 * RÔLE :
 * Le kernel ne parle jamais directement à une base : chaque composant reçoit un
 * `Arc<dyn Storage>` à la construction. Un backend = une implémentation des
 * quatre traits ci-dessous, le cœur ne fait jamais de branchement selon le backend.
 *
 * FONCTIONNEMENT :
 * - HostStore    : identité des hôtes + snapshot matériel
 * - StatusStore  : couple (is_online, last_seen), upsert idempotent
 * - SampleStore  : série de mesures append-only
 * - OutageStore  : registre des pannes, au plus une panne active par hôte
 *
 * "Absent" = `Option::None`, jamais une erreur. Les erreurs sont réservées aux
 * cas exceptionnels (I/O, sérialisation, violation d'invariant).
 */

mod json;

pub use json::JsonStore;

use crate::models::{HardwareInfo, Host, MetricSample, Outage, StatusRecord};
use time::OffsetDateTime;

/// Erreurs de persistance (PersistenceError)
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Unknown host: {0}")]
    UnknownHost(String),
    #[error("Host {0} already has an active outage")]
    OutageAlreadyActive(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait HostStore {
    fn get_host(&self, id: &str) -> Result<Option<Host>, StoreError>;

    fn list_hosts(&self) -> Result<Vec<Host>, StoreError>;

    /// Remplace l'ensemble des hôtes déclarés.
    /// Les snapshots matériels des hôtes conservés sont préservés.
    fn sync_hosts(&self, hosts: Vec<Host>) -> Result<(), StoreError>;

    fn update_hardware(&self, id: &str, hardware: &HardwareInfo) -> Result<(), StoreError>;
}

pub trait StatusStore {
    fn get_status(&self, host_id: &str) -> Result<Option<StatusRecord>, StoreError>;

    fn list_statuses(&self) -> Result<Vec<StatusRecord>, StoreError>;

    /// Crée ou met à jour le statut. `last_seen` ne recule jamais :
    /// une valeur plus ancienne que celle stockée est ignorée.
    fn upsert_status(
        &self,
        host_id: &str,
        is_online: bool,
        last_seen: OffsetDateTime,
    ) -> Result<StatusRecord, StoreError>;
}

pub trait SampleStore {
    fn append_sample(&self, sample: &MetricSample) -> Result<(), StoreError>;

    fn latest_sample(&self, host_id: &str) -> Result<Option<MetricSample>, StoreError>;
}

pub trait OutageStore {
    fn get_active_outage(&self, host_id: &str) -> Result<Option<Outage>, StoreError>;

    /// Ouvre une panne. Doit échouer avec `OutageAlreadyActive` si une panne
    /// est déjà ouverte pour cet hôte (vérification atomique).
    fn create_outage(
        &self,
        host_id: &str,
        title: &str,
        content: &str,
        start_time: OffsetDateTime,
    ) -> Result<Outage, StoreError>;

    /// Ferme une panne. Ne touche que les pannes encore ouvertes ;
    /// retourne false si la panne est inconnue ou déjà fermée.
    fn close_outage(&self, outage_id: &str, end_time: OffsetDateTime) -> Result<bool, StoreError>;

    /// Pannes les plus récentes d'abord
    fn recent_outages(&self, limit: usize) -> Result<Vec<Outage>, StoreError>;
}

/// Backend complet injecté dans les composants du kernel
pub trait Storage: HostStore + StatusStore + SampleStore + OutageStore + Send + Sync {}

impl<T> Storage for T where T: HostStore + StatusStore + SampleStore + OutageStore + Send + Sync {}
