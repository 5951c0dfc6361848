use crate::config::MqttConf;
use crate::reconciler::Transition;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tokio::task;
use tracing::{debug, warn};

pub const TRANSITION_TOPIC: &str = "sentinel/hosts/transition@v1";

/// Publication des fronts committés sur l'event bus MQTT (best-effort)
#[derive(Clone)]
pub struct EventBus {
    client: AsyncClient,
}

impl EventBus {
    /// Crée le client et spawn la boucle d'événements (reconnexion auto)
    pub fn spawn(conf: &MqttConf) -> Self {
        let mut opts = MqttOptions::new("sentinel-kernel", &conf.host, conf.port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, 64);

        task::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(_) => {}
                    Err(e) => {
                        warn!("[mqtt] event loop error: {:?}", e);
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        Self { client }
    }

    /// Non bloquant : si le broker est injoignable et la file pleine, l'événement est perdu
    pub fn publish_transition(&self, transition: &Transition) {
        let payload = match serde_json::to_vec(transition) {
            Ok(p) => p,
            Err(e) => {
                warn!("[mqtt] failed to encode transition: {}", e);
                return;
            }
        };
        match self.client.try_publish(TRANSITION_TOPIC, QoS::AtLeastOnce, false, payload) {
            Ok(()) => debug!("[mqtt] published transition for {}", transition.host_id),
            Err(e) => warn!("[mqtt] failed to publish transition: {:?}", e),
        }
    }
}
