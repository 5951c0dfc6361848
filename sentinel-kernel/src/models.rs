/**
 * MODÈLES - Enregistrements manipulés par le kernel Sentinel
 *
 * Host (identité + secret + snapshot matériel), StatusRecord (online + last_seen),
 * MetricSample (série append-only), Outage (intervalle de panne).
 * HeartbeatIn = payload brut reçu sur POST /report.
 */

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use time::OffsetDateTime;

/// Hôte surveillé, déclaré dans kernel.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub name: String,
    pub secret: String,
    /// Adresse source autorisée (None = toute adresse acceptée)
    pub ip: Option<IpAddr>,
    pub hardware: Option<HardwareInfo>,
}

/// Snapshot matériel envoyé opportunément par l'agent (`static_info`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareInfo {
    pub cpu_cores: Option<u32>,
    pub cpu_model: Option<String>,
    pub mem_total_bytes: Option<u64>,
    pub disk_total_bytes: Option<u64>,
    pub system: Option<String>,
    pub arch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub host_id: String,
    pub is_online: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}

/// Mesures d'un heartbeat. Tous les champs sont optionnels côté agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics {
    pub cpu_usage: f64,
    pub mem_usage_percent: f64,
    pub disk_usage_percent: f64,
    pub uptime: String,
    pub load_avg: f64,
    pub net_up_speed: u64,
    pub net_down_speed: u64,
    pub total_up: u64,
    pub total_down: u64,
    pub processes: Option<u32>,
    pub connections: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub host_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(flatten)]
    pub metrics: Metrics,
}

/// Intervalle de panne. `end_time == None` => panne active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outage {
    pub id: String,
    pub host_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    pub title: String,
    pub content: String,
}

impl Outage {
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    /// Durée de la panne, None tant qu'elle est ouverte
    pub fn duration(&self) -> Option<time::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// Payload POST /report (format historique des agents)
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatIn {
    #[serde(default)]
    pub server_id: String,
    #[serde(default)]
    pub secret: String,
    #[serde(flatten)]
    pub metrics: Metrics,
    pub static_info: Option<HardwareInfo>,
}
