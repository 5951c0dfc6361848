use crate::monitor::Monitor;
use crate::store::{HostStore, OutageStore, StatusStore};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use time::OffsetDateTime;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub hosts_tracked: u32,
    pub hosts_online: u32,
    pub active_outages: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_sweep: Option<OffsetDateTime>,
    pub notifications_enabled: bool,
    pub store_status: String,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn get_health(&self, monitor: &Monitor) -> KernelHealth {
        let store = monitor.store();
        let mut store_status = "ok".to_string();

        let hosts = store.list_hosts().unwrap_or_else(|e| {
            store_status = format!("error: {e}");
            Vec::new()
        });
        let online = store
            .list_statuses()
            .map(|s| {
                s.iter()
                    .filter(|st| st.is_online && hosts.iter().any(|h| h.id == st.host_id))
                    .count()
            })
            .unwrap_or(0);
        let active = hosts
            .iter()
            .filter(|h| matches!(store.get_active_outage(&h.id), Ok(Some(_))))
            .count();

        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            hosts_tracked: hosts.len() as u32,
            hosts_online: online as u32,
            active_outages: active as u32,
            last_sweep: monitor.last_sweep(),
            notifications_enabled: monitor.notifications_enabled(),
            store_status,
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
