//! Scénarios bout-en-bout : heartbeat / sweep / registre / alertes

use futures::future::BoxFuture;
use parking_lot::Mutex;
use sentinel_kernel::models::{
    HardwareInfo, HeartbeatIn, Host, MetricSample, Metrics, Outage, StatusRecord,
};
use sentinel_kernel::notify::{AlertChannel, Dispatcher, NotifyError};
use sentinel_kernel::reconciler::TransitionKind;
use sentinel_kernel::store::{HostStore, OutageStore, SampleStore, StatusStore, StoreError};
use sentinel_kernel::sweep::OFFLINE_THRESHOLD;
use sentinel_kernel::validator::{AuthError, IngestError};
use sentinel_kernel::{JsonStore, Monitor};
use std::net::IpAddr;
use std::sync::Arc;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

/// Canal qui enregistre les messages au lieu de les envoyer
#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<String>>,
}

impl AlertChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    fn send<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            self.sent.lock().push(text.to_string());
            Ok(())
        })
    }
}

/// Store dont les écritures de statut et la lecture des pannes échouent pour un hôte
struct FailingHost {
    inner: JsonStore,
    broken: &'static str,
}

impl FailingHost {
    fn check(&self, host_id: &str) -> Result<(), StoreError> {
        if host_id == self.broken {
            return Err(StoreError::Io(std::io::Error::other("disk unavailable")));
        }
        Ok(())
    }
}

impl HostStore for FailingHost {
    fn get_host(&self, id: &str) -> Result<Option<Host>, StoreError> {
        self.inner.get_host(id)
    }

    fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
        self.inner.list_hosts()
    }

    fn sync_hosts(&self, hosts: Vec<Host>) -> Result<(), StoreError> {
        self.inner.sync_hosts(hosts)
    }

    fn update_hardware(&self, id: &str, hardware: &HardwareInfo) -> Result<(), StoreError> {
        self.inner.update_hardware(id, hardware)
    }
}

impl StatusStore for FailingHost {
    fn get_status(&self, host_id: &str) -> Result<Option<StatusRecord>, StoreError> {
        self.inner.get_status(host_id)
    }

    fn list_statuses(&self) -> Result<Vec<StatusRecord>, StoreError> {
        self.inner.list_statuses()
    }

    fn upsert_status(
        &self,
        host_id: &str,
        is_online: bool,
        last_seen: OffsetDateTime,
    ) -> Result<StatusRecord, StoreError> {
        self.check(host_id)?;
        self.inner.upsert_status(host_id, is_online, last_seen)
    }
}

impl SampleStore for FailingHost {
    fn append_sample(&self, sample: &MetricSample) -> Result<(), StoreError> {
        self.inner.append_sample(sample)
    }

    fn latest_sample(&self, host_id: &str) -> Result<Option<MetricSample>, StoreError> {
        self.inner.latest_sample(host_id)
    }
}

impl OutageStore for FailingHost {
    fn get_active_outage(&self, host_id: &str) -> Result<Option<Outage>, StoreError> {
        self.check(host_id)?;
        self.inner.get_active_outage(host_id)
    }

    fn create_outage(
        &self,
        host_id: &str,
        title: &str,
        content: &str,
        start_time: OffsetDateTime,
    ) -> Result<Outage, StoreError> {
        self.inner.create_outage(host_id, title, content, start_time)
    }

    fn close_outage(&self, outage_id: &str, end_time: OffsetDateTime) -> Result<bool, StoreError> {
        self.inner.close_outage(outage_id, end_time)
    }

    fn recent_outages(&self, limit: usize) -> Result<Vec<Outage>, StoreError> {
        self.inner.recent_outages(limit)
    }
}

const SECRET: &str = "0123456789abcdef0123456789abcdef";
const T0: OffsetDateTime = datetime!(2024-05-01 10:00:00 UTC);

fn fleet(ids: &[&str]) -> Arc<JsonStore> {
    let store = Arc::new(JsonStore::in_memory());
    store
        .sync_hosts(
            ids.iter()
                .map(|id| Host {
                    id: id.to_string(),
                    name: format!("{id}-name"),
                    secret: SECRET.to_string(),
                    ip: None,
                    hardware: None,
                })
                .collect(),
        )
        .unwrap();
    store
}

fn with_recorder(store: Arc<JsonStore>) -> (Monitor, Arc<RecordingChannel>) {
    let channel = Arc::new(RecordingChannel::default());
    let dispatcher = Dispatcher::new(Some(channel.clone() as Arc<dyn AlertChannel>));
    (Monitor::new(store, dispatcher), channel)
}

fn heartbeat(host_id: &str, secret: &str) -> HeartbeatIn {
    HeartbeatIn {
        server_id: host_id.to_string(),
        secret: secret.to_string(),
        metrics: Metrics {
            cpu_usage: 7.5,
            mem_usage_percent: 40.0,
            uptime: "2 days".into(),
            ..Default::default()
        },
        static_info: None,
    }
}

fn peer() -> IpAddr {
    "198.51.100.4".parse().unwrap()
}

fn active_outages<S: OutageStore + ?Sized>(store: &S, host_id: &str) -> usize {
    store
        .recent_outages(usize::MAX)
        .unwrap()
        .iter()
        .filter(|o| o.host_id == host_id && o.end_time.is_none())
        .count()
}

#[tokio::test]
async fn scenario_a_silent_host_goes_offline_once() {
    let store = fleet(&["h1"]);
    let (monitor, channel) = with_recorder(store.clone());

    monitor.ingest(&heartbeat("h1", SECRET), peer(), T0).unwrap();
    monitor.reconcile_and_notify(T0).await;
    assert!(channel.sent.lock().is_empty());

    let now = T0 + Duration::seconds(40);
    let report = monitor.check_and_notify(now).await;

    assert_eq!(report.sweep.demoted, vec!["h1".to_string()]);
    assert_eq!(report.reconcile.transitions.len(), 1);
    assert_eq!(report.notified, 1);
    let outage = store.get_active_outage("h1").unwrap().unwrap();
    assert_eq!(outage.title, "host offline");
    assert_eq!(outage.start_time, now);
    assert_eq!(channel.sent.lock().len(), 1);
    assert!(channel.sent.lock()[0].contains("Host offline"));

    // passes suivantes : pas de nouvelle panne ni d'alerte
    for i in 1..=3 {
        let report = monitor.check_and_notify(now + Duration::seconds(10 * i)).await;
        assert!(report.reconcile.transitions.is_empty());
    }
    assert_eq!(active_outages(store.as_ref(), "h1"), 1);
    assert_eq!(channel.sent.lock().len(), 1);
}

#[tokio::test]
async fn scenario_b_recovery_closes_outage_once() {
    let store = fleet(&["h1"]);
    let (monitor, channel) = with_recorder(store.clone());

    // panne ouverte il y a 120s
    let opened_at = T0;
    store.upsert_status("h1", false, opened_at - Duration::seconds(40)).unwrap();
    monitor.check_and_notify(opened_at).await;
    assert_eq!(channel.sent.lock().len(), 1);

    let back = opened_at + Duration::seconds(120);
    monitor.ingest(&heartbeat("h1", SECRET), peer(), back).unwrap();
    let report = monitor.reconcile_and_notify(back).await;

    assert_eq!(report.transitions.len(), 1);
    assert_eq!(
        report.transitions[0].kind,
        TransitionKind::Recovered { downtime_seconds: 120 }
    );
    let closed = store.recent_outages(1).unwrap().remove(0);
    assert_eq!(closed.duration(), Some(Duration::seconds(120)));
    assert_eq!(active_outages(store.as_ref(), "h1"), 0);
    {
        let sent = channel.sent.lock();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].contains("back online"));
        assert!(sent[1].contains("about 2 minutes"));
    }

    // second heartbeat identique : rien ne bouge
    let again = back + Duration::seconds(1);
    monitor.ingest(&heartbeat("h1", SECRET), peer(), again).unwrap();
    let report = monitor.reconcile_and_notify(again).await;
    assert!(report.transitions.is_empty());
    assert_eq!(store.recent_outages(10).unwrap().len(), 1);
    assert_eq!(channel.sent.lock().len(), 2);
}

#[tokio::test]
async fn scenario_c_wrong_secret_has_no_side_effects() {
    let store = fleet(&["h1"]);
    let (monitor, channel) = with_recorder(store.clone());

    let err = monitor
        .ingest(&heartbeat("h1", "not-the-secret"), peer(), T0)
        .unwrap_err();
    assert!(matches!(err, IngestError::Auth(AuthError::BadSecret(_))));

    assert!(store.latest_sample("h1").unwrap().is_none());
    assert!(store.get_status("h1").unwrap().is_none());

    monitor.check_and_notify(T0 + Duration::minutes(5)).await;
    assert!(store.recent_outages(10).unwrap().is_empty());
    assert!(channel.sent.lock().is_empty());
}

#[tokio::test]
async fn scenario_d_unconfigured_channel_keeps_ledger_correct() {
    let store = fleet(&["h1"]);
    let monitor = Monitor::new(store.clone(), Dispatcher::disabled());

    monitor.ingest(&heartbeat("h1", SECRET), peer(), T0).unwrap();

    let down = T0 + OFFLINE_THRESHOLD + Duration::seconds(1);
    let report = monitor.check_and_notify(down).await;
    assert_eq!(report.reconcile.transitions.len(), 1);
    assert_eq!(report.notified, 0);
    assert_eq!(active_outages(store.as_ref(), "h1"), 1);

    let up = down + Duration::minutes(3);
    monitor.ingest(&heartbeat("h1", SECRET), peer(), up).unwrap();
    let report = monitor.reconcile_and_notify(up).await;
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(active_outages(store.as_ref(), "h1"), 0);
}

#[tokio::test]
async fn unrelated_hosts_are_reconciled_independently() {
    let store = fleet(&["h1", "h2", "h3"]);
    let (monitor, channel) = with_recorder(store.clone());

    for id in ["h1", "h2", "h3"] {
        monitor.ingest(&heartbeat(id, SECRET), peer(), T0).unwrap();
    }
    // seul h2 continue de rapporter
    let later = T0 + Duration::seconds(60);
    monitor.ingest(&heartbeat("h2", SECRET), peer(), later).unwrap();

    let report = monitor.check_and_notify(later).await;
    let mut demoted = report.sweep.demoted.clone();
    demoted.sort();
    assert_eq!(demoted, vec!["h1".to_string(), "h3".to_string()]);
    assert_eq!(channel.sent.lock().len(), 2);
    assert_eq!(active_outages(store.as_ref(), "h2"), 0);
}

#[tokio::test]
async fn store_failure_on_one_host_does_not_stop_the_others() {
    let inner = JsonStore::in_memory();
    inner
        .sync_hosts(
            ["h1", "h2"]
                .iter()
                .map(|id| Host {
                    id: id.to_string(),
                    name: format!("{id}-name"),
                    secret: SECRET.to_string(),
                    ip: None,
                    hardware: None,
                })
                .collect(),
        )
        .unwrap();
    inner.upsert_status("h1", true, T0).unwrap();
    inner.upsert_status("h2", true, T0).unwrap();
    let store = Arc::new(FailingHost { inner, broken: "h1" });
    let channel = Arc::new(RecordingChannel::default());
    let monitor = Monitor::new(
        store.clone(),
        Dispatcher::new(Some(channel.clone() as Arc<dyn AlertChannel>)),
    );

    let report = monitor.check_and_notify(T0 + Duration::minutes(1)).await;

    assert_eq!(report.sweep.demoted, vec!["h2".to_string()]);
    assert_eq!(report.sweep.failed, vec!["h1".to_string()]);
    assert_eq!(report.reconcile.failed, vec!["h1".to_string()]);
    assert_eq!(report.reconcile.transitions.len(), 1);
    assert_eq!(report.reconcile.transitions[0].host_id, "h2");
    assert!(store.inner.get_active_outage("h2").unwrap().is_some());
    assert!(store.inner.get_active_outage("h1").unwrap().is_none());
    assert!(store.inner.get_status("h1").unwrap().unwrap().is_online);
    assert_eq!(channel.sent.lock().len(), 1);
}

#[test]
fn concurrent_heartbeats_and_sweeps_keep_one_active_outage() {
    let store = fleet(&["h1"]);
    let monitor = Arc::new(Monitor::new(store.clone(), Dispatcher::disabled()));
    monitor.ingest(&heartbeat("h1", SECRET), peer(), T0).unwrap();

    let mut handles = Vec::new();
    for worker in 0..8i64 {
        let monitor = monitor.clone();
        handles.push(std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            for step in 0..50i64 {
                let now = T0 + Duration::seconds(worker * 50 + step);
                if (worker + step) % 3 == 0 {
                    let _ = monitor.ingest(&heartbeat("h1", SECRET), peer(), now);
                }
                rt.block_on(monitor.check_and_notify(now + Duration::seconds(100)));
                rt.block_on(monitor.reconcile_and_notify(now));
                assert!(active_outages(monitor.store().as_ref(), "h1") <= 1);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert!(active_outages(store.as_ref(), "h1") <= 1);
}
