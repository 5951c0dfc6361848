/**
 * OUTAGE LEDGER - Accès gardé au registre des pannes
 *
 * Invariant : pour un hôte donné, au plus une panne avec `end_time = None`.
 * `open` est refusé par le store si une panne est déjà active ;
 * `close` ne touche que les pannes encore ouvertes.
 */

use crate::models::Outage;
use crate::store::{OutageStore, Storage, StoreError};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info};

pub const OFFLINE_TITLE: &str = "host offline";
pub const OFFLINE_CONTENT: &str = "host stopped reporting data.";

#[derive(Clone)]
pub struct OutageLedger {
    store: Arc<dyn Storage>,
}

impl OutageLedger {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self { store }
    }

    pub fn get_active(&self, host_id: &str) -> Result<Option<Outage>, StoreError> {
        self.store.get_active_outage(host_id)
    }

    pub fn open(
        &self,
        host_id: &str,
        title: &str,
        content: &str,
        now: OffsetDateTime,
    ) -> Result<Outage, StoreError> {
        let outage = self.store.create_outage(host_id, title, content, now)?;
        info!("[ledger] opened outage {} for host {}", outage.id, host_id);
        Ok(outage)
    }

    /// Retourne false si la panne était déjà fermée (course perdue)
    pub fn close(&self, outage_id: &str, end_time: OffsetDateTime) -> Result<bool, StoreError> {
        let closed = self.store.close_outage(outage_id, end_time)?;
        if closed {
            info!("[ledger] closed outage {}", outage_id);
        } else {
            debug!("[ledger] outage {} already closed", outage_id);
        }
        Ok(closed)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<Outage>, StoreError> {
        self.store.recent_outages(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonStore;
    use time::macros::datetime;

    #[test]
    fn test_open_close_cycle() {
        let ledger = OutageLedger::new(Arc::new(JsonStore::in_memory()));
        let t = datetime!(2024-05-01 10:00:00 UTC);

        let outage = ledger.open("h1", OFFLINE_TITLE, OFFLINE_CONTENT, t).unwrap();
        assert!(matches!(
            ledger.open("h1", OFFLINE_TITLE, OFFLINE_CONTENT, t),
            Err(StoreError::OutageAlreadyActive(_))
        ));
        assert_eq!(ledger.get_active("h1").unwrap(), Some(outage.clone()));

        assert!(ledger.close(&outage.id, t + time::Duration::seconds(30)).unwrap());
        assert!(!ledger.close(&outage.id, t + time::Duration::seconds(60)).unwrap());
        assert!(ledger.get_active("h1").unwrap().is_none());
        assert_eq!(ledger.recent(10).unwrap().len(), 1);
    }
}
