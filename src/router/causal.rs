use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::backend::Backend;
use crate::config::{ConsistencyLevel, RouterConfig};
use crate::context::CausalContext;
use crate::core::{Result, RouterError};
use crate::lsn::registry::ProbeRegistry;
use crate::lsn::Lsn;
use crate::query::QueryKind;
use crate::router::{BackendProvider, QueryRouter};

/// LSN-aware router: honors the caller's causal token, checks replica
/// replay positions on demand, and falls back to a primary when a replica
/// lags.
///
/// The selector runs exactly once per decision — the router never walks the
/// replica list probing each one, which would amplify load exactly when the
/// replicas are behind. At most one probe round-trip happens per read, and
/// none per write (the write's capture runs after execution).
pub struct CausalRouter {
    config: RouterConfig,
    provider: Arc<dyn BackendProvider>,
    registry: Arc<ProbeRegistry>,
    last_primary_lsn: RwLock<Lsn>,
}

impl CausalRouter {
    pub fn new(
        provider: Arc<dyn BackendProvider>,
        registry: Arc<ProbeRegistry>,
        config: RouterConfig,
    ) -> Self {
        Self {
            config,
            provider,
            registry,
            last_primary_lsn: RwLock::new(Lsn::ZERO),
        }
    }

    fn pick_primary(&self) -> Result<Backend> {
        let primaries = self.provider.primaries();
        if primaries.is_empty() {
            return Err(RouterError::NoPrimaryAvailable);
        }
        Ok(self.provider.balancer().resolve(primaries).clone())
    }

    /// One-shot replica eligibility check: select a candidate, read its
    /// replay position, accept it when caught up. Probe errors and timeouts
    /// count as "not caught up".
    async fn caught_up_replica(&self, required: Lsn) -> Option<Backend> {
        let replicas = self.provider.replicas();
        if replicas.is_empty() {
            return None;
        }

        let candidate = self.provider.balancer().resolve(replicas).clone();
        let probe = self.registry.probe_for(&candidate);

        match probe.last_replay_lsn().await {
            Ok(replay) if replay >= required => {
                debug!(backend = %candidate.id(), %replay, %required, "replica caught up");
                Some(candidate)
            }
            Ok(replay) => {
                debug!(backend = %candidate.id(), %replay, %required, "replica lagging");
                None
            }
            Err(err) => {
                debug!(backend = %candidate.id(), error = %err, "replay LSN check failed");
                None
            }
        }
    }

    fn any_read_backend(&self) -> Result<Backend> {
        let replicas = self.provider.replicas();
        if !replicas.is_empty() {
            return Ok(self.provider.balancer().resolve(replicas).clone());
        }
        self.pick_primary()
    }

    fn remember_primary_lsn(&self, lsn: Lsn) {
        *self
            .last_primary_lsn
            .write()
            .expect("primary LSN lock poisoned") = lsn;
    }

    /// Queries the first primary for its current WAL position and refreshes
    /// the cached value. Callable outside the write path.
    pub async fn current_primary_lsn(&self) -> Result<Lsn> {
        let primaries = self.provider.primaries();
        let primary = primaries.first().ok_or(RouterError::NoPrimaryAvailable)?;

        let lsn = self.registry.probe_for(primary).current_wal_lsn().await?;
        self.remember_primary_lsn(lsn);
        Ok(lsn)
    }

    /// Last primary position observed by any capture, without I/O.
    pub fn last_known_primary_lsn(&self) -> Lsn {
        *self
            .last_primary_lsn
            .read()
            .expect("primary LSN lock poisoned")
    }
}

#[async_trait]
impl QueryRouter for CausalRouter {
    async fn route(&self, ctx: &CausalContext, kind: QueryKind) -> Result<Backend> {
        if self.provider.primaries().is_empty() {
            return Err(RouterError::NoPrimaryAvailable);
        }

        if kind == QueryKind::Write {
            debug!("write statement, routing to primary");
            return self.pick_primary();
        }

        let token = ctx.token();

        if token.is_some_and(|t| t.force_primary) {
            debug!("primary forced by token");
            return self.pick_primary();
        }

        // A strong deployment stays strong regardless of what a token
        // asks for; otherwise the token's own level wins, so a
        // round-tripped cookie demands read-your-writes even when bare
        // requests default to something weaker.
        let level = if self.config.level == ConsistencyLevel::Strong {
            ConsistencyLevel::Strong
        } else {
            token.map(|t| t.level).unwrap_or(self.config.level)
        };
        if level == ConsistencyLevel::Strong {
            debug!("strong consistency, routing to primary");
            return self.pick_primary();
        }

        if level == ConsistencyLevel::ReadYourWrites {
            if let Some(token) = token.filter(|t| !t.required_lsn.is_zero()) {
                // With no replicas configured there is nothing to check;
                // the primary trivially satisfies the requirement.
                if !self.provider.replicas().is_empty() {
                    if let Some(replica) = self.caught_up_replica(token.required_lsn).await {
                        return Ok(replica);
                    }
                    if self.config.fallback_to_primary {
                        debug!("no replica caught up, falling back to primary");
                        return self.pick_primary();
                    }
                    return Err(RouterError::NoReplicaCaughtUp);
                }
            }
        }

        // ReadYourWrites without a requirement, or no requirement at all:
        // plain read routing, no probe round-trip.
        self.any_read_backend()
    }

    async fn update_after_write(&self, ctx: &CausalContext, backend: &Backend) -> Result<Lsn> {
        let lsn = self.registry.probe_for(backend).current_wal_lsn().await?;

        self.remember_primary_lsn(lsn);
        ctx.update_required_lsn(lsn, self.config.level);

        debug!(backend = %backend.id(), %lsn, "captured primary LSN after write");
        Ok(lsn)
    }
}
