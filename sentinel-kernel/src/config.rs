use crate::models::Host;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KernelConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub hosts: BTreeMap<String, HostConf>,
    #[serde(default)]
    pub telegram: TelegramConf,
    pub mqtt: Option<MqttConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HostConf {
    pub name: Option<String>,
    pub secret: String,
    pub ip: Option<IpAddr>, // ex: 203.0.113.7, rapports refusés depuis une autre IP
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TelegramConf {
    #[serde(default)]
    pub enabled: bool,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub api_base: Option<String>, // défaut: https://api.telegram.org
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_sweep_interval() -> u64 {
    10
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            data_dir: default_data_dir(),
            sweep_interval_secs: default_sweep_interval(),
            hosts: BTreeMap::new(),
            telegram: TelegramConf::default(),
            mqtt: None,
        }
    }
}

impl KernelConfig {
    /// Hôtes déclarés, nom par défaut = id
    pub fn hosts(&self) -> Vec<Host> {
        self.hosts
            .iter()
            .map(|(id, h)| Host {
                id: id.clone(),
                name: h.name.clone().unwrap_or_else(|| id.clone()),
                secret: h.secret.clone(),
                ip: h.ip,
                hardware: None,
            })
            .collect()
    }

    /// Les secrets Telegram peuvent venir de l'environnement (.env)
    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("SENTINEL_TELEGRAM_TOKEN") {
            self.telegram.bot_token = Some(token);
            self.telegram.enabled = true;
        }
        if let Ok(chat) = std::env::var("SENTINEL_TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = Some(chat);
        }
    }
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("SENTINEL_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt).unwrap_or_else(|e| {
            warn!("[kernel] invalid config {}: {}", path, e);
            KernelConfig::default()
        })
    } else {
        info!("[kernel] no {}, using default config", path);
        KernelConfig::default()
    };
    cfg.apply_env();
    cfg
}
