use std::collections::HashSet;
use std::sync::Arc;

use sqlx::postgres::{PgArguments, PgQueryResult, PgRow};
use tracing::debug;

use super::database::BackendSet;
use crate::backend::{Backend, BackendId};
use crate::context::CausalContext;
use crate::core::{Result, RouterError};
use crate::query::QueryKind;
use crate::router::{BackendProvider, QueryRouter};

/// A statement prepared on every backend.
///
/// Execution routes like any other statement; the selected backend then
/// reuses the statement it prepared earlier (the driver keys its statement
/// cache by SQL text per connection). Replicas that failed preparation are
/// degraded: when the router picks one, a primary runs the statement
/// instead.
pub struct PreparedStatement {
    sql: String,
    kind: QueryKind,
    backends: Arc<BackendSet>,
    router: Arc<dyn QueryRouter>,
    degraded: HashSet<BackendId>,
}

impl PreparedStatement {
    pub(crate) fn new(
        sql: String,
        kind: QueryKind,
        backends: Arc<BackendSet>,
        router: Arc<dyn QueryRouter>,
        degraded: HashSet<BackendId>,
    ) -> Self {
        Self {
            sql,
            kind,
            backends,
            router,
            degraded,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// True when the statement was classified as a write at prepare time.
    pub fn is_write(&self) -> bool {
        self.kind == QueryKind::Write
    }

    /// Number of replicas substituting a primary for this statement.
    pub fn degraded_backends(&self) -> usize {
        self.degraded.len()
    }

    async fn target(&self, ctx: &CausalContext, kind: QueryKind) -> Result<Backend> {
        let backend = self.router.route(ctx, kind).await?;
        if self.degraded.contains(&backend.id()) {
            debug!(backend = %backend.id(), "statement degraded on this replica, using primary");
            return Ok(self
                .backends
                .balancer()
                .resolve(self.backends.primaries())
                .clone());
        }
        Ok(backend)
    }

    /// Runs the statement for its side effects, always on a primary, with
    /// the post-write LSN capture.
    pub async fn exec(&self, ctx: &CausalContext) -> Result<PgQueryResult> {
        self.exec_with(ctx, PgArguments::default()).await
    }

    /// [`exec`](Self::exec) with bound arguments.
    pub async fn exec_with(
        &self,
        ctx: &CausalContext,
        args: PgArguments,
    ) -> Result<PgQueryResult> {
        let backend = self.target(ctx, QueryKind::Write).await?;
        let result = sqlx::query_with(&self.sql, args)
            .execute(backend.pool())
            .await
            .map_err(RouterError::from_query_error)?;

        if let Err(err) = self.router.update_after_write(ctx, &backend).await {
            debug!(error = %err, "failed to capture LSN after prepared write");
        }
        Ok(result)
    }

    /// Runs the statement and collects its rows, routed by the kind
    /// determined at prepare time.
    pub async fn query(&self, ctx: &CausalContext) -> Result<Vec<PgRow>> {
        self.query_with(ctx, PgArguments::default()).await
    }

    /// [`query`](Self::query) with bound arguments.
    pub async fn query_with(
        &self,
        ctx: &CausalContext,
        args: PgArguments,
    ) -> Result<Vec<PgRow>> {
        let backend = self.target(ctx, self.kind).await?;
        sqlx::query_with(&self.sql, args)
            .fetch_all(backend.pool())
            .await
            .map_err(RouterError::from_query_error)
    }

    /// Runs the statement expecting exactly one row.
    pub async fn query_row(&self, ctx: &CausalContext) -> Result<PgRow> {
        self.query_row_with(ctx, PgArguments::default()).await
    }

    /// [`query_row`](Self::query_row) with bound arguments.
    pub async fn query_row_with(
        &self,
        ctx: &CausalContext,
        args: PgArguments,
    ) -> Result<PgRow> {
        let backend = self.target(ctx, self.kind).await?;
        sqlx::query_with(&self.sql, args)
            .fetch_one(backend.pool())
            .await
            .map_err(RouterError::from_query_error)
    }
}
