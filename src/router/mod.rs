// ============================================================================
// Routing decision engine
// ============================================================================

mod causal;
mod passthrough;

pub use causal::CausalRouter;
pub use passthrough::PassthroughRouter;

use async_trait::async_trait;

use crate::backend::Backend;
use crate::balancer::LoadBalance;
use crate::context::CausalContext;
use crate::core::Result;
use crate::lsn::Lsn;
use crate::query::QueryKind;

/// Narrow view of the façade's backend lists.
///
/// Routers reach primaries and replicas only through this capability, which
/// keeps them decoupled from the façade and lets tests hand them fixed
/// backend sets.
pub trait BackendProvider: Send + Sync {
    fn primaries(&self) -> &[Backend];
    fn replicas(&self) -> &[Backend];
    fn balancer(&self) -> &dyn LoadBalance<Backend>;
}

/// A routing policy: pick a backend for a statement, and capture the WAL
/// position after a write.
///
/// Each decision is independent; all per-session state lives in the
/// [`CausalContext`]. Routing failures are reported, never retried here —
/// the façade decides whether to retry with `force_primary`.
#[async_trait]
pub trait QueryRouter: Send + Sync {
    /// Chooses a backend for a statement of the given kind.
    async fn route(&self, ctx: &CausalContext, kind: QueryKind) -> Result<Backend>;

    /// Captures the primary's WAL position after a successful write and
    /// raises the context token accordingly.
    ///
    /// `backend` must be the backend that performed the write: under
    /// failover another primary may not have produced this position yet.
    /// Implementations without LSN tracking return [`Lsn::ZERO`].
    async fn update_after_write(&self, ctx: &CausalContext, backend: &Backend) -> Result<Lsn>;
}
