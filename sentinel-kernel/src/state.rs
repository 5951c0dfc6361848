use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Exclusion mutuelle par hôte.
///
/// Toute séquence lire-décider-écrire sur le statut ou les pannes d'un hôte
/// (heartbeat, démotion par le sweep, réconciliation) se fait sous ce verrou.
/// Le verrou ne doit jamais être tenu à travers un `.await`.
#[derive(Clone, Default)]
pub struct HostLocks {
    inner: Shared<HashMap<String, Arc<Mutex<()>>>>,
}

impl HostLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retourne le verrou de l'hôte (créé au premier accès)
    pub fn for_host(&self, host_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock();
        map.entry(host_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
