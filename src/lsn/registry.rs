use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::backend::{Backend, BackendId};
use crate::lsn::probe::{LsnProbe, PgLsnProbe};

/// Builds the probe for a backend on first use.
///
/// The façade installs [`PgProbeFactory`] by default; tests inject factories
/// that return scripted probes.
pub trait ProbeFactory: Send + Sync {
    fn probe_for(&self, backend: &Backend, query_timeout: Duration) -> Arc<dyn LsnProbe>;
}

/// Default factory producing pool-backed probes.
#[derive(Debug, Default)]
pub struct PgProbeFactory;

impl ProbeFactory for PgProbeFactory {
    fn probe_for(&self, backend: &Backend, query_timeout: Duration) -> Arc<dyn LsnProbe> {
        Arc::new(PgLsnProbe::new(backend.pool().clone(), query_timeout))
    }
}

/// One probe per backend, created lazily and kept for the life of the
/// registry. The backend set is fixed at façade construction, so entries are
/// never evicted.
pub struct ProbeRegistry {
    probes: RwLock<HashMap<BackendId, Arc<dyn LsnProbe>>>,
    factory: Arc<dyn ProbeFactory>,
    query_timeout: Duration,
}

impl ProbeRegistry {
    pub fn new(factory: Arc<dyn ProbeFactory>, query_timeout: Duration) -> Self {
        Self {
            probes: RwLock::new(HashMap::new()),
            factory,
            query_timeout,
        }
    }

    /// Returns the backend's probe, creating it on first use.
    ///
    /// Fast path takes the read lock only; creation re-checks under the
    /// write lock so concurrent first users agree on one instance.
    pub fn probe_for(&self, backend: &Backend) -> Arc<dyn LsnProbe> {
        if let Some(probe) = self
            .probes
            .read()
            .expect("probe registry lock poisoned")
            .get(&backend.id())
        {
            return Arc::clone(probe);
        }

        let mut probes = self.probes.write().expect("probe registry lock poisoned");
        if let Some(probe) = probes.get(&backend.id()) {
            return Arc::clone(probe);
        }

        let probe = self.factory.probe_for(backend, self.query_timeout);
        probes.insert(backend.id(), Arc::clone(&probe));
        probe
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.probes.read().unwrap().len()
    }
}
