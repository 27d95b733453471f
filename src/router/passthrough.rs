use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::Backend;
use crate::context::CausalContext;
use crate::core::{Result, RouterError};
use crate::lsn::Lsn;
use crate::query::QueryKind;
use crate::router::{BackendProvider, QueryRouter};

/// Plain read/write splitting with no causal tracking.
///
/// Writes go to a primary, reads to a replica when one exists. Installed by
/// the façade when LSN routing is disabled.
pub struct PassthroughRouter {
    provider: Arc<dyn BackendProvider>,
}

impl PassthroughRouter {
    pub fn new(provider: Arc<dyn BackendProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl QueryRouter for PassthroughRouter {
    async fn route(&self, _ctx: &CausalContext, kind: QueryKind) -> Result<Backend> {
        let primaries = self.provider.primaries();
        if primaries.is_empty() {
            return Err(RouterError::NoPrimaryAvailable);
        }

        if kind != QueryKind::Write {
            let replicas = self.provider.replicas();
            if !replicas.is_empty() {
                return Ok(self.provider.balancer().resolve(replicas).clone());
            }
        }

        Ok(self.provider.balancer().resolve(primaries).clone())
    }

    async fn update_after_write(&self, _ctx: &CausalContext, _backend: &Backend) -> Result<Lsn> {
        // No tracking: callers receive the sentinel and emit nothing.
        Ok(Lsn::ZERO)
    }
}
