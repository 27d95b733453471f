use std::collections::HashSet;
use std::sync::Arc;

use super::statements::PreparedStatement;
use super::transactions::Transaction;

use futures::future::{join_all, try_join_all};
use sqlx::postgres::{PgArguments, PgQueryResult, PgRow};
use sqlx::{Connection, Executor, PgPool};
use tracing::warn;

use crate::backend::{Backend, BackendStats};
use crate::balancer::LoadBalance;
use crate::config::RouterConfig;
use crate::context::CausalContext;
use crate::core::{is_connection_error, Result, RouterError};
use crate::lsn::registry::{PgProbeFactory, ProbeFactory, ProbeRegistry};
use crate::lsn::Lsn;
use crate::query::{QueryClassifier, QueryKind, RegexQueryClassifier};
use crate::router::{BackendProvider, CausalRouter, PassthroughRouter, QueryRouter};

/// The façade's backend lists plus the selection policy; this is the
/// [`BackendProvider`] the routers see.
pub(crate) struct BackendSet {
    primaries: Vec<Backend>,
    replicas: Vec<Backend>,
    balancer: Box<dyn LoadBalance<Backend>>,
}

impl BackendProvider for BackendSet {
    fn primaries(&self) -> &[Backend] {
        &self.primaries
    }

    fn replicas(&self) -> &[Backend] {
        &self.replicas
    }

    fn balancer(&self) -> &dyn LoadBalance<Backend> {
        &*self.balancer
    }
}

/// A logical database over one or more primaries and any number of
/// replicas.
///
/// Statements pass through the classifier and the router, which picks the
/// physical backend; writes additionally capture the primary's WAL position
/// so later reads through the same [`CausalContext`] observe them.
///
/// # Examples
///
/// ```ignore
/// let db = ResolverDb::new(
///     vec![primary_pool],
///     vec![replica_pool],
///     RouterConfig::new().enabled(true),
/// )?;
///
/// let ctx = CausalContext::new();
/// db.exec(&ctx, "INSERT INTO users (name) VALUES ('alice')").await?;
/// let rows = db.query(&ctx, "SELECT * FROM users").await?; // sees alice
/// ```
pub struct ResolverDb {
    backends: Arc<BackendSet>,
    registry: Arc<ProbeRegistry>,
    classifier: Arc<dyn QueryClassifier>,
    router: Arc<dyn QueryRouter>,
    config: RouterConfig,
}

impl std::fmt::Debug for ResolverDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverDb")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ResolverDb {
    /// Builds a façade over the given pools. Fails when no primary is
    /// configured or the config does not validate.
    pub fn new(
        primaries: Vec<PgPool>,
        replicas: Vec<PgPool>,
        config: RouterConfig,
    ) -> Result<Self> {
        let mut builder = Self::builder().config(config);
        for pool in primaries {
            builder = builder.primary(pool);
        }
        for pool in replicas {
            builder = builder.replica(pool);
        }
        builder.build()
    }

    pub fn builder() -> ResolverDbBuilder {
        ResolverDbBuilder::default()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn primaries(&self) -> &[Backend] {
        self.backends.primaries()
    }

    pub fn replicas(&self) -> &[Backend] {
        self.backends.replicas()
    }

    pub fn is_causal_enabled(&self) -> bool {
        self.config.enabled
    }

    /// A write-capable backend, chosen by the selector.
    pub fn read_write(&self) -> Backend {
        self.backends
            .balancer()
            .resolve(self.backends.primaries())
            .clone()
    }

    /// A read backend ignoring causal requirements: some replica when any
    /// exist, otherwise a primary.
    pub fn read_only(&self) -> Backend {
        let replicas = self.backends.replicas();
        if replicas.is_empty() {
            self.read_write()
        } else {
            self.backends.balancer().resolve(replicas).clone()
        }
    }

    /// Executes a statement that returns no rows. Always runs on a primary;
    /// a successful execution captures the primary's WAL position into the
    /// context.
    pub async fn exec(&self, ctx: &CausalContext, sql: &str) -> Result<PgQueryResult> {
        let backend = self.router.route(ctx, QueryKind::Write).await?;
        let result = sqlx::query(sql)
            .execute(backend.pool())
            .await
            .map_err(RouterError::from_query_error)?;

        self.capture_after_write(ctx, &backend).await;
        Ok(result)
    }

    /// [`exec`](Self::exec) with bound arguments.
    pub async fn exec_with(
        &self,
        ctx: &CausalContext,
        sql: &str,
        args: PgArguments,
    ) -> Result<PgQueryResult> {
        let backend = self.router.route(ctx, QueryKind::Write).await?;
        let result = sqlx::query_with(sql, args)
            .execute(backend.pool())
            .await
            .map_err(RouterError::from_query_error)?;

        self.capture_after_write(ctx, &backend).await;
        Ok(result)
    }

    /// Executes a statement that returns rows.
    ///
    /// The statement is classified and routed; a read that fails with a
    /// connection-level error is retried once against a primary. Writes
    /// (e.g. `INSERT ... RETURNING`) are never retried.
    pub async fn query(&self, ctx: &CausalContext, sql: &str) -> Result<Vec<PgRow>> {
        let (backend, is_write) = self.route_statement(ctx, sql).await?;

        let outcome = sqlx::query(sql).fetch_all(backend.pool()).await;
        let rows = match outcome {
            Err(err) if !is_write && is_connection_error(&err) => {
                let primary = self.read_write();
                sqlx::query(sql)
                    .fetch_all(primary.pool())
                    .await
                    .map_err(RouterError::from_query_error)?
            }
            other => other.map_err(RouterError::from_query_error)?,
        };

        if is_write {
            self.capture_after_write(ctx, &backend).await;
        }
        Ok(rows)
    }

    /// [`query`](Self::query) with bound arguments.
    pub async fn query_with(
        &self,
        ctx: &CausalContext,
        sql: &str,
        args: PgArguments,
    ) -> Result<Vec<PgRow>> {
        let (backend, is_write) = self.route_statement(ctx, sql).await?;
        let retry_args = args.clone();

        let outcome = sqlx::query_with(sql, args).fetch_all(backend.pool()).await;
        let rows = match outcome {
            Err(err) if !is_write && is_connection_error(&err) => {
                let primary = self.read_write();
                sqlx::query_with(sql, retry_args)
                    .fetch_all(primary.pool())
                    .await
                    .map_err(RouterError::from_query_error)?
            }
            other => other.map_err(RouterError::from_query_error)?,
        };

        if is_write {
            self.capture_after_write(ctx, &backend).await;
        }
        Ok(rows)
    }

    /// Executes a statement expected to return exactly one row.
    pub async fn query_row(&self, ctx: &CausalContext, sql: &str) -> Result<PgRow> {
        let (backend, is_write) = self.route_statement(ctx, sql).await?;

        let outcome = sqlx::query(sql).fetch_one(backend.pool()).await;
        let row = match outcome {
            Err(err) if !is_write && is_connection_error(&err) => {
                let primary = self.read_write();
                sqlx::query(sql)
                    .fetch_one(primary.pool())
                    .await
                    .map_err(RouterError::from_query_error)?
            }
            other => other.map_err(RouterError::from_query_error)?,
        };

        if is_write {
            self.capture_after_write(ctx, &backend).await;
        }
        Ok(row)
    }

    /// [`query_row`](Self::query_row) with bound arguments.
    pub async fn query_row_with(
        &self,
        ctx: &CausalContext,
        sql: &str,
        args: PgArguments,
    ) -> Result<PgRow> {
        let (backend, is_write) = self.route_statement(ctx, sql).await?;
        let retry_args = args.clone();

        let outcome = sqlx::query_with(sql, args).fetch_one(backend.pool()).await;
        let row = match outcome {
            Err(err) if !is_write && is_connection_error(&err) => {
                let primary = self.read_write();
                sqlx::query_with(sql, retry_args)
                    .fetch_one(primary.pool())
                    .await
                    .map_err(RouterError::from_query_error)?
            }
            other => other.map_err(RouterError::from_query_error)?,
        };

        if is_write {
            self.capture_after_write(ctx, &backend).await;
        }
        Ok(row)
    }

    /// Executes a statement returning at most one row.
    pub async fn query_opt(&self, ctx: &CausalContext, sql: &str) -> Result<Option<PgRow>> {
        let (backend, is_write) = self.route_statement(ctx, sql).await?;

        let outcome = sqlx::query(sql).fetch_optional(backend.pool()).await;
        let row = match outcome {
            Err(err) if !is_write && is_connection_error(&err) => {
                let primary = self.read_write();
                sqlx::query(sql)
                    .fetch_optional(primary.pool())
                    .await
                    .map_err(RouterError::from_query_error)?
            }
            other => other.map_err(RouterError::from_query_error)?,
        };

        if is_write {
            self.capture_after_write(ctx, &backend).await;
        }
        Ok(row)
    }

    /// Prepares a statement on every backend, primary and replica,
    /// concurrently.
    ///
    /// PostgreSQL prepared statements are per-connection, so each backend
    /// must see the statement before routed execution can use it. A replica
    /// that fails preparation with a connection-level error is degraded: the
    /// returned statement substitutes a primary whenever the router selects
    /// that replica.
    pub async fn prepare(&self, _ctx: &CausalContext, sql: &str) -> Result<PreparedStatement> {
        let kind = self.classifier.classify(sql);

        let primary_results = join_all(
            self.backends
                .primaries()
                .iter()
                .map(|backend| prepare_on(backend, sql)),
        )
        .await;
        for result in primary_results {
            result?;
        }

        let replica_results = join_all(
            self.backends
                .replicas()
                .iter()
                .map(|backend| prepare_on(backend, sql)),
        )
        .await;

        let mut degraded = HashSet::new();
        for (backend, result) in self.backends.replicas().iter().zip(replica_results) {
            match result {
                Ok(()) => {}
                Err(RouterError::Connection(err)) => {
                    warn!(
                        backend = %backend.id(),
                        error = %err,
                        "replica failed to prepare, degrading it to the primary"
                    );
                    degraded.insert(backend.id());
                }
                Err(err) => return Err(err),
            }
        }

        Ok(PreparedStatement::new(
            sql.to_string(),
            kind,
            Arc::clone(&self.backends),
            Arc::clone(&self.router),
            degraded,
        ))
    }

    /// Starts a transaction pinned to a primary.
    ///
    /// The transaction tracks whether any of its statements wrote; the WAL
    /// position is captured once, at commit. Rollback captures nothing.
    pub async fn begin(&self, ctx: &CausalContext) -> Result<Transaction> {
        let backend = self.router.route(ctx, QueryKind::Write).await?;
        let tx = backend
            .pool()
            .begin()
            .await
            .map_err(RouterError::from_query_error)?;

        Ok(Transaction::new(
            tx,
            backend,
            ctx.clone(),
            Arc::clone(&self.router),
            Arc::clone(&self.classifier),
        ))
    }

    /// Verifies every backend with one round-trip each, concurrently.
    pub async fn ping(&self) -> Result<()> {
        let all = self
            .backends
            .primaries()
            .iter()
            .chain(self.backends.replicas());
        try_join_all(all.map(|backend| async move {
            let mut conn = backend
                .pool()
                .acquire()
                .await
                .map_err(RouterError::from_query_error)?;
            conn.ping().await.map_err(RouterError::from_query_error)
        }))
        .await?;
        Ok(())
    }

    /// Closes every backend pool, releasing open connections.
    pub async fn close(&self) {
        let all = self
            .backends
            .primaries()
            .iter()
            .chain(self.backends.replicas());
        join_all(all.map(|backend| backend.pool().close())).await;
    }

    /// Point-in-time counters for every backend pool.
    pub fn stats(&self) -> Vec<BackendStats> {
        self.backends
            .primaries()
            .iter()
            .chain(self.backends.replicas())
            .map(Backend::stats)
            .collect()
    }

    /// Queries the first primary for its current WAL position.
    pub async fn current_primary_lsn(&self) -> Result<Lsn> {
        let primary = self
            .backends
            .primaries()
            .first()
            .ok_or(RouterError::NoPrimaryAvailable)?;
        self.registry.probe_for(primary).current_wal_lsn().await
    }

    async fn route_statement(
        &self,
        ctx: &CausalContext,
        sql: &str,
    ) -> Result<(Backend, bool)> {
        let kind = self.classifier.classify(sql);
        let backend = self.router.route(ctx, kind).await?;
        Ok((backend, kind == QueryKind::Write))
    }

    /// Best-effort LSN capture: a failure here degrades consistency to
    /// plain replication, it never fails the caller's statement.
    async fn capture_after_write(&self, ctx: &CausalContext, backend: &Backend) {
        if let Err(err) = self.router.update_after_write(ctx, backend).await {
            warn!(backend = %backend.id(), error = %err, "failed to capture LSN after write");
        }
    }
}

async fn prepare_on(backend: &Backend, sql: &str) -> Result<()> {
    let mut conn = backend
        .pool()
        .acquire()
        .await
        .map_err(RouterError::from_query_error)?;
    (&mut *conn)
        .prepare(sql)
        .await
        .map_err(RouterError::from_query_error)?;
    Ok(())
}

/// Builder for [`ResolverDb`], the place to inject a custom classifier or
/// probe factory.
#[derive(Default)]
pub struct ResolverDbBuilder {
    primaries: Vec<PgPool>,
    replicas: Vec<PgPool>,
    config: RouterConfig,
    classifier: Option<Arc<dyn QueryClassifier>>,
    probe_factory: Option<Arc<dyn ProbeFactory>>,
}

impl ResolverDbBuilder {
    pub fn primary(mut self, pool: PgPool) -> Self {
        self.primaries.push(pool);
        self
    }

    pub fn replica(mut self, pool: PgPool) -> Self {
        self.replicas.push(pool);
        self
    }

    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn QueryClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn probe_factory(mut self, factory: Arc<dyn ProbeFactory>) -> Self {
        self.probe_factory = Some(factory);
        self
    }

    pub fn build(self) -> Result<ResolverDb> {
        self.config.validate()?;
        if self.primaries.is_empty() {
            return Err(RouterError::Config(
                "at least one primary connection is required".into(),
            ));
        }

        let backends = Arc::new(BackendSet {
            primaries: self.primaries.into_iter().map(Backend::primary).collect(),
            replicas: self.replicas.into_iter().map(Backend::replica).collect(),
            balancer: self.config.load_balancer_policy.build(),
        });

        let factory = self
            .probe_factory
            .unwrap_or_else(|| Arc::new(PgProbeFactory));
        let registry = Arc::new(ProbeRegistry::new(factory, self.config.lsn_query_timeout));

        let backends_clone: Arc<BackendSet> = Arc::clone(&backends);
        let provider: Arc<dyn BackendProvider> = backends_clone;
        let router: Arc<dyn QueryRouter> = if self.config.enabled {
            Arc::new(CausalRouter::new(
                provider,
                Arc::clone(&registry),
                self.config.clone(),
            ))
        } else {
            Arc::new(PassthroughRouter::new(provider))
        };

        Ok(ResolverDb {
            backends,
            registry,
            classifier: self
                .classifier
                .unwrap_or_else(|| Arc::new(RegexQueryClassifier::new())),
            router,
            config: self.config,
        })
    }
}
