/**
 * NOTIFICATION DISPATCHER - Alertes best-effort vers un canal bot (Telegram)
 *
 * RÔLE :
 * Formate et envoie un message court pour chaque front committé par le
 * reconciler. Un canal non configuré = no-op silencieux (retour false).
 * Les échecs de livraison sont loggés puis avalés : le registre des pannes
 * est déjà à jour et n'est jamais annulé.
 *
 * LIMITE CONNUE : pas de file de retry, une alerte ratée est perdue.
 */

use crate::config::TelegramConf;
use crate::reconciler::{Transition, TransitionKind};
use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// NotificationDeliveryError : toujours récupérée localement
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("channel rejected message ({status}): {description}")]
    Rejected { status: u16, description: String },
}

/// Canal de sortie des alertes
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;

    fn send<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), NotifyError>>;
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
}

pub struct TelegramChannel {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramChannel {
    /// None si le canal est désactivé ou si token / chat id manquent
    pub fn from_config(conf: &TelegramConf) -> Option<Self> {
        if !conf.enabled {
            return None;
        }
        let token = conf.bot_token.as_deref().map(str::trim).unwrap_or_default();
        let chat_id = conf.chat_id.as_deref().map(str::trim).unwrap_or_default();
        if token.is_empty() || chat_id.is_empty() {
            warn!("[notify] telegram enabled but bot token or chat id is missing, alerts disabled");
            return None;
        }

        let client = match Client::builder().timeout(Duration::from_secs(10)).build() {
            Ok(c) => c,
            Err(e) => {
                warn!("[notify] failed to build http client, alerts disabled: {}", e);
                return None;
            }
        };

        Some(Self {
            client,
            api_base: conf
                .api_base
                .clone()
                .unwrap_or_else(|| TELEGRAM_API.to_string())
                .trim_end_matches('/')
                .to_string(),
            bot_token: token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let resp = self
            .client
            .post(&url)
            .form(&[
                ("chat_id", self.chat_id.as_str()),
                ("text", text),
                ("parse_mode", "Markdown"),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<TelegramResponse>(&body).ok();

        match parsed {
            Some(TelegramResponse { ok: true, .. }) if status.is_success() => Ok(()),
            Some(r) => Err(NotifyError::Rejected {
                status: status.as_u16(),
                description: r.description.unwrap_or_else(|| "unknown error".into()),
            }),
            None => Err(NotifyError::Rejected {
                status: status.as_u16(),
                description: body,
            }),
        }
    }
}

impl AlertChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn send<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(self.send_message(text))
    }
}

#[derive(Clone, Default)]
pub struct Dispatcher {
    channel: Option<Arc<dyn AlertChannel>>,
}

impl Dispatcher {
    pub fn new(channel: Option<Arc<dyn AlertChannel>>) -> Self {
        Self { channel }
    }

    pub fn disabled() -> Self {
        Self { channel: None }
    }

    pub fn from_config(conf: &TelegramConf) -> Self {
        let channel = TelegramChannel::from_config(conf).map(|c| Arc::new(c) as Arc<dyn AlertChannel>);
        Self { channel }
    }

    pub fn is_enabled(&self) -> bool {
        self.channel.is_some()
    }

    /// Retourne true si le canal a accepté le message. Ne lève jamais d'erreur.
    pub async fn notify(&self, transition: &Transition) -> bool {
        self.send_text(&format_transition(transition)).await
    }

    pub async fn send_text(&self, text: &str) -> bool {
        let Some(channel) = &self.channel else {
            debug!("[notify] no channel configured, alert dropped");
            return false;
        };
        match channel.send(text).await {
            Ok(()) => {
                info!("[notify] alert delivered via {}", channel.name());
                true
            }
            Err(e) => {
                warn!("[notify] delivery via {} failed: {}", channel.name(), e);
                false
            }
        }
    }
}

pub fn format_transition(t: &Transition) -> String {
    match t.kind {
        TransitionKind::Offline => format!(
            "🔴 *Host offline*\n\nHost `{}` (`{}`) stopped responding.",
            t.host_name, t.host_id
        ),
        TransitionKind::Recovered { downtime_seconds } => format!(
            "✅ *Host recovered*\n\nHost `{}` (`{}`) is back online.\nDowntime: about {}.",
            t.host_name,
            t.host_id,
            format_duration(downtime_seconds)
        ),
    }
}

/// <60s en secondes, <1h en minutes arrondies, sinon heures à une décimale
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    if seconds < 60 {
        plural(seconds as f64, "second")
    } else if seconds < 3600 {
        plural((seconds as f64 / 60.0).round(), "minute")
    } else {
        plural((seconds as f64 / 3600.0 * 10.0).round() / 10.0, "hour")
    }
}

fn plural(value: f64, unit: &str) -> String {
    if value == 1.0 {
        format!("1 {unit}")
    } else {
        format!("{value} {unit}s")
    }
}
