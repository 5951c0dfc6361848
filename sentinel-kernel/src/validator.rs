/**
 * HEARTBEAT VALIDATOR - Authentification des rapports entrants
 *
 * Un rapport est accepté si : l'hôte existe, le secret présenté correspond
 * (comparaison en temps constant), et l'adresse source correspond à l'IP liée
 * quand l'hôte en a une. Aucun effet de bord : l'écriture de la mesure et du
 * statut est faite par l'appelant, sous le verrou de l'hôte.
 */

use crate::models::Host;
use crate::store::{HostStore, Storage, StoreError};
use std::net::IpAddr;
use std::sync::Arc;

/// AuthenticationError : rejet du rapport, aucune logique de panne ne tourne
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unknown host: {0}")]
    UnknownHost(String),
    #[error("invalid secret for host {0}")]
    BadSecret(String),
    #[error("host {host} is bound to {expected}, report came from {actual}")]
    AddressMismatch {
        host: String,
        expected: IpAddr,
        actual: IpAddr,
    },
}

/// Échec de l'ingestion d'un heartbeat
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid report: {0}")]
    Invalid(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct HeartbeatValidator {
    store: Arc<dyn Storage>,
}

impl HeartbeatValidator {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self { store }
    }

    pub fn validate(&self, host_id: &str, secret: &str, source: IpAddr) -> Result<Host, IngestError> {
        let host = self
            .store
            .get_host(host_id)?
            .ok_or_else(|| AuthError::UnknownHost(host_id.to_string()))?;

        if !constant_time_eq(secret.as_bytes(), host.secret.as_bytes()) {
            return Err(AuthError::BadSecret(host.id).into());
        }

        if let Some(expected) = host.ip {
            let actual = source.to_canonical();
            if expected.to_canonical() != actual {
                return Err(AuthError::AddressMismatch {
                    host: host.id,
                    expected,
                    actual,
                }
                .into());
            }
        }

        Ok(host)
    }
}

/// Comparaison en temps constant (pas de fuite du préfixe commun)
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
