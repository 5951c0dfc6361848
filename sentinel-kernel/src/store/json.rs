/**
 * BACKEND JSON - Cache mémoire + snapshots JSON sur disque
 *
 * FONCTIONNEMENT :
 * - hosts.json / status.json / outages.json : snapshot complet réécrit à chaque
 *   mutation (écriture dans un .tmp puis rename)
 * - samples.jsonl : une ligne JSON par mesure, append-only ; seule la dernière
 *   mesure de chaque hôte est gardée en mémoire
 * - `JsonStore::in_memory()` : même sémantique sans disque (tests, dev)
 *
 * Toutes les opérations passent par un seul Mutex, ce qui rend le contrôle
 * "une seule panne active par hôte" de `create_outage` atomique.
 */

use super::{HostStore, OutageStore, SampleStore, StatusStore, StoreError};
use crate::models::{HardwareInfo, Host, MetricSample, Outage, StatusRecord};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

const HOSTS_FILE: &str = "hosts.json";
const STATUS_FILE: &str = "status.json";
const OUTAGES_FILE: &str = "outages.json";
const SAMPLES_FILE: &str = "samples.jsonl";

#[derive(Default)]
struct Tables {
    hosts: BTreeMap<String, Host>,
    statuses: BTreeMap<String, StatusRecord>,
    outages: Vec<Outage>,
    latest: HashMap<String, MetricSample>,
}

pub struct JsonStore {
    /// None = pas de persistance disque
    dir: Option<PathBuf>,
    tables: Mutex<Tables>,
}

impl JsonStore {
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Ouvre (ou crée) le répertoire de données et recharge les snapshots
    pub fn open<P: Into<PathBuf>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let hosts: Vec<Host> = load_json(&dir.join(HOSTS_FILE))?.unwrap_or_default();
        let statuses: Vec<StatusRecord> = load_json(&dir.join(STATUS_FILE))?.unwrap_or_default();
        let outages: Vec<Outage> = load_json(&dir.join(OUTAGES_FILE))?.unwrap_or_default();
        let latest = load_latest_samples(&dir.join(SAMPLES_FILE))?;

        info!(
            "[store] loaded {} hosts, {} statuses, {} outages from {:?}",
            hosts.len(),
            statuses.len(),
            outages.len(),
            dir
        );

        let tables = Tables {
            hosts: hosts.into_iter().map(|h| (h.id.clone(), h)).collect(),
            statuses: statuses.into_iter().map(|s| (s.host_id.clone(), s)).collect(),
            outages,
            latest,
        };

        Ok(Self {
            dir: Some(dir),
            tables: Mutex::new(tables),
        })
    }

    fn persist<T: Serialize>(&self, file: &str, value: &T) -> Result<(), StoreError> {
        let Some(dir) = &self.dir else { return Ok(()) };
        let json = serde_json::to_string_pretty(value)?;
        let tmp = dir.join(format!("{file}.tmp"));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, dir.join(file))?;
        Ok(())
    }

    fn persist_hosts(&self, hosts: &BTreeMap<String, Host>) -> Result<(), StoreError> {
        self.persist(HOSTS_FILE, &hosts.values().collect::<Vec<_>>())
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&content)?))
}

fn load_latest_samples(path: &Path) -> Result<HashMap<String, MetricSample>, StoreError> {
    let mut latest: HashMap<String, MetricSample> = HashMap::new();
    if !path.exists() {
        return Ok(latest);
    }

    let reader = BufReader::new(fs::File::open(path)?);
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<MetricSample>(&line) {
            Ok(sample) => {
                let newer = latest
                    .get(&sample.host_id)
                    .map_or(true, |cur| sample.timestamp >= cur.timestamp);
                if newer {
                    latest.insert(sample.host_id.clone(), sample);
                }
            }
            // ligne tronquée (crash pendant un append) : on saute
            Err(e) => warn!("[store] skipping invalid sample line {}: {}", n + 1, e),
        }
    }
    Ok(latest)
}

impl HostStore for JsonStore {
    fn get_host(&self, id: &str) -> Result<Option<Host>, StoreError> {
        Ok(self.tables.lock().hosts.get(id).cloned())
    }

    fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
        Ok(self.tables.lock().hosts.values().cloned().collect())
    }

    fn sync_hosts(&self, hosts: Vec<Host>) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let mut next = BTreeMap::new();
        for mut host in hosts {
            if host.hardware.is_none() {
                host.hardware = tables.hosts.get(&host.id).and_then(|h| h.hardware.clone());
            }
            next.insert(host.id.clone(), host);
        }
        self.persist_hosts(&next)?;

        // statuts des hôtes retirés de la config
        let before = tables.statuses.len();
        let statuses: BTreeMap<String, StatusRecord> = tables
            .statuses
            .iter()
            .filter(|(id, _)| next.contains_key(*id))
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();
        if statuses.len() != before {
            self.persist(STATUS_FILE, &statuses.values().collect::<Vec<_>>())?;
            info!("[store] dropped {} status(es) of removed hosts", before - statuses.len());
        }

        tables.hosts = next;
        tables.statuses = statuses;
        Ok(())
    }

    fn update_hardware(&self, id: &str, hardware: &HardwareInfo) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let host = tables
            .hosts
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownHost(id.to_string()))?;
        if host.hardware.as_ref() == Some(hardware) {
            return Ok(());
        }
        host.hardware = Some(hardware.clone());
        self.persist_hosts(&tables.hosts)
    }
}

impl StatusStore for JsonStore {
    fn get_status(&self, host_id: &str) -> Result<Option<StatusRecord>, StoreError> {
        Ok(self.tables.lock().statuses.get(host_id).cloned())
    }

    fn list_statuses(&self) -> Result<Vec<StatusRecord>, StoreError> {
        Ok(self.tables.lock().statuses.values().cloned().collect())
    }

    fn upsert_status(
        &self,
        host_id: &str,
        is_online: bool,
        last_seen: OffsetDateTime,
    ) -> Result<StatusRecord, StoreError> {
        let mut tables = self.tables.lock();
        let record = match tables.statuses.get(host_id) {
            Some(cur) => StatusRecord {
                host_id: host_id.to_string(),
                is_online,
                last_seen: cur.last_seen.max(last_seen),
            },
            None => StatusRecord {
                host_id: host_id.to_string(),
                is_online,
                last_seen,
            },
        };
        // disque d'abord, comme pour les pannes
        let mut next = tables.statuses.clone();
        next.insert(host_id.to_string(), record.clone());
        self.persist(STATUS_FILE, &next.values().collect::<Vec<_>>())?;
        tables.statuses = next;
        Ok(record)
    }
}

impl SampleStore for JsonStore {
    fn append_sample(&self, sample: &MetricSample) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        if let Some(dir) = &self.dir {
            let mut line = serde_json::to_string(sample)?;
            line.push('\n');
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(SAMPLES_FILE))?;
            file.write_all(line.as_bytes())?;
        }
        let newer = tables
            .latest
            .get(&sample.host_id)
            .map_or(true, |cur| sample.timestamp >= cur.timestamp);
        if newer {
            tables.latest.insert(sample.host_id.clone(), sample.clone());
        }
        Ok(())
    }

    fn latest_sample(&self, host_id: &str) -> Result<Option<MetricSample>, StoreError> {
        Ok(self.tables.lock().latest.get(host_id).cloned())
    }
}

impl OutageStore for JsonStore {
    fn get_active_outage(&self, host_id: &str) -> Result<Option<Outage>, StoreError> {
        let tables = self.tables.lock();
        Ok(tables
            .outages
            .iter()
            .filter(|o| o.host_id == host_id && o.is_active())
            .max_by_key(|o| o.start_time)
            .cloned())
    }

    fn create_outage(
        &self,
        host_id: &str,
        title: &str,
        content: &str,
        start_time: OffsetDateTime,
    ) -> Result<Outage, StoreError> {
        let mut tables = self.tables.lock();
        if tables.outages.iter().any(|o| o.host_id == host_id && o.is_active()) {
            return Err(StoreError::OutageAlreadyActive(host_id.to_string()));
        }

        let outage = Outage {
            id: Uuid::new_v4().to_string(),
            host_id: host_id.to_string(),
            start_time,
            end_time: None,
            title: title.to_string(),
            content: content.to_string(),
        };

        // disque d'abord : un échec d'écriture ne laisse pas de panne fantôme en mémoire
        let mut next = tables.outages.clone();
        next.push(outage.clone());
        self.persist(OUTAGES_FILE, &next)?;
        tables.outages = next;
        Ok(outage)
    }

    fn close_outage(&self, outage_id: &str, end_time: OffsetDateTime) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        let Some(idx) = tables
            .outages
            .iter()
            .position(|o| o.id == outage_id && o.is_active())
        else {
            return Ok(false);
        };

        let mut next = tables.outages.clone();
        let outage = &mut next[idx];
        outage.end_time = Some(end_time.max(outage.start_time));
        self.persist(OUTAGES_FILE, &next)?;
        tables.outages = next;
        Ok(true)
    }

    fn recent_outages(&self, limit: usize) -> Result<Vec<Outage>, StoreError> {
        let tables = self.tables.lock();
        let mut outages = tables.outages.clone();
        outages.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        outages.truncate(limit);
        Ok(outages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metrics;
    use time::macros::datetime;

    fn host(id: &str) -> Host {
        Host {
            id: id.to_string(),
            name: format!("{id}-name"),
            secret: "secret".to_string(),
            ip: None,
            hardware: None,
        }
    }

    #[test]
    fn test_last_seen_never_moves_backward() {
        let store = JsonStore::in_memory();
        let t1 = datetime!(2024-05-01 10:00:00 UTC);
        let t0 = datetime!(2024-05-01 09:59:00 UTC);

        store.upsert_status("h1", true, t1).unwrap();
        let rec = store.upsert_status("h1", false, t0).unwrap();

        assert!(!rec.is_online);
        assert_eq!(rec.last_seen, t1);
        assert_eq!(store.get_status("h1").unwrap().unwrap().last_seen, t1);
    }

    #[test]
    fn test_second_active_outage_is_rejected() {
        let store = JsonStore::in_memory();
        let t = datetime!(2024-05-01 10:00:00 UTC);

        let first = store.create_outage("h1", "host offline", "", t).unwrap();
        let err = store.create_outage("h1", "host offline", "", t).unwrap_err();
        assert!(matches!(err, StoreError::OutageAlreadyActive(ref h) if h == "h1"));

        // un autre hôte n'est pas concerné
        store.create_outage("h2", "host offline", "", t).unwrap();

        assert!(store.close_outage(&first.id, t + time::Duration::minutes(1)).unwrap());
        store.create_outage("h1", "host offline", "", t + time::Duration::minutes(2)).unwrap();
    }

    #[test]
    fn test_close_only_affects_open_outage() {
        let store = JsonStore::in_memory();
        let start = datetime!(2024-05-01 10:00:00 UTC);
        let outage = store.create_outage("h1", "host offline", "", start).unwrap();

        assert!(store.close_outage(&outage.id, start + time::Duration::seconds(30)).unwrap());
        assert!(!store.close_outage(&outage.id, start + time::Duration::seconds(90)).unwrap());
        assert!(!store.close_outage("missing", start).unwrap());

        let closed = store.recent_outages(10).unwrap().remove(0);
        assert_eq!(closed.end_time, Some(start + time::Duration::seconds(30)));
        assert!(store.get_active_outage("h1").unwrap().is_none());
    }

    #[test]
    fn test_close_clamps_end_before_start() {
        let store = JsonStore::in_memory();
        let start = datetime!(2024-05-01 10:00:00 UTC);
        let outage = store.create_outage("h1", "host offline", "", start).unwrap();

        store.close_outage(&outage.id, start - time::Duration::seconds(5)).unwrap();
        let closed = store.recent_outages(1).unwrap().remove(0);
        assert_eq!(closed.end_time, Some(start));
    }

    #[test]
    fn test_sync_hosts_keeps_hardware() {
        let store = JsonStore::in_memory();
        store.sync_hosts(vec![host("h1"), host("h2")]).unwrap();
        let hw = HardwareInfo {
            cpu_cores: Some(8),
            ..Default::default()
        };
        store.update_hardware("h1", &hw).unwrap();

        let mut renamed = host("h1");
        renamed.name = "web-1".into();
        store.sync_hosts(vec![renamed]).unwrap();

        let h1 = store.get_host("h1").unwrap().unwrap();
        assert_eq!(h1.name, "web-1");
        assert_eq!(h1.hardware, Some(hw));
        assert!(store.get_host("h2").unwrap().is_none());
        assert!(matches!(
            store.update_hardware("h2", &HardwareInfo::default()),
            Err(StoreError::UnknownHost(_))
        ));
    }

    #[test]
    fn test_sync_hosts_drops_removed_statuses() {
        let store = JsonStore::in_memory();
        let t = datetime!(2024-05-01 10:00:00 UTC);
        store.sync_hosts(vec![host("h1"), host("h2")]).unwrap();
        store.upsert_status("h1", true, t).unwrap();
        store.upsert_status("h2", true, t).unwrap();

        store.sync_hosts(vec![host("h1")]).unwrap();

        let statuses = store.list_statuses().unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].host_id, "h1");
    }

    #[test]
    fn test_failed_status_write_keeps_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let t = datetime!(2024-05-01 10:00:00 UTC);
        let store = JsonStore::open(dir.path()).unwrap();
        store.upsert_status("h1", false, t).unwrap();

        // un répertoire à la place du .tmp fait échouer l'écriture du snapshot
        fs::create_dir(dir.path().join(format!("{STATUS_FILE}.tmp"))).unwrap();
        let err = store.upsert_status("h1", true, t + time::Duration::seconds(5));
        assert!(matches!(err, Err(StoreError::Io(_))));

        let status = store.get_status("h1").unwrap().unwrap();
        assert!(!status.is_online);
        assert_eq!(status.last_seen, t);
    }

    #[test]
    fn test_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let t = datetime!(2024-05-01 10:00:00 UTC);

        {
            let store = JsonStore::open(dir.path()).unwrap();
            store.sync_hosts(vec![host("h1")]).unwrap();
            store.upsert_status("h1", true, t).unwrap();
            for secs in [0, 10, 20] {
                store
                    .append_sample(&MetricSample {
                        host_id: "h1".into(),
                        timestamp: t + time::Duration::seconds(secs),
                        metrics: Metrics {
                            cpu_usage: secs as f64,
                            ..Default::default()
                        },
                    })
                    .unwrap();
            }
            store.create_outage("h1", "host offline", "host stopped reporting data.", t).unwrap();
        }

        let store = JsonStore::open(dir.path()).unwrap();
        assert_eq!(store.list_hosts().unwrap().len(), 1);
        assert_eq!(store.get_status("h1").unwrap().unwrap().last_seen, t);
        let latest = store.latest_sample("h1").unwrap().unwrap();
        assert_eq!(latest.metrics.cpu_usage, 20.0);
        assert!(store.get_active_outage("h1").unwrap().is_some());
    }
}
