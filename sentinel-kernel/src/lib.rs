//! Sentinel kernel - collecteur central des heartbeats
//!
//! Ingestion authentifiée des rapports agents, dead-man's switch périodique,
//! registre des pannes (au plus une active par hôte) et une alerte par front.

pub mod config;
pub mod health;
pub mod http;
pub mod ledger;
pub mod models;
pub mod monitor;
pub mod mqtt;
pub mod notify;
pub mod reconciler;
pub mod state;
pub mod store;
pub mod sweep;
pub mod validator;

pub use monitor::Monitor;
pub use store::{JsonStore, Storage};
