use std::sync::Arc;

use sqlx::postgres::{PgArguments, PgQueryResult, PgRow};
use sqlx::Postgres;
use tracing::warn;

use crate::backend::Backend;
use crate::context::CausalContext;
use crate::core::{Result, RouterError};
use crate::query::{QueryClassifier, QueryKind};
use crate::router::QueryRouter;

/// A transaction pinned to one primary.
///
/// Statements inside the transaction never route — they run on the pinned
/// connection. The transaction records whether anything wrote; the WAL
/// position is captured once, after a successful commit, so a long
/// transaction costs a single LSN round-trip. Rollback emits nothing.
pub struct Transaction {
    tx: sqlx::Transaction<'static, Postgres>,
    backend: Backend,
    ctx: CausalContext,
    router: Arc<dyn QueryRouter>,
    classifier: Arc<dyn QueryClassifier>,
    writes_occurred: bool,
}

impl Transaction {
    pub(crate) fn new(
        tx: sqlx::Transaction<'static, Postgres>,
        backend: Backend,
        ctx: CausalContext,
        router: Arc<dyn QueryRouter>,
        classifier: Arc<dyn QueryClassifier>,
    ) -> Self {
        Self {
            tx,
            backend,
            ctx,
            router,
            classifier,
            writes_occurred: false,
        }
    }

    /// The primary this transaction is pinned to.
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn writes_occurred(&self) -> bool {
        self.writes_occurred
    }

    /// Executes a statement for its side effects. Any successful `exec`
    /// marks the transaction as writing.
    pub async fn exec(&mut self, sql: &str) -> Result<PgQueryResult> {
        let result = sqlx::query(sql)
            .execute(&mut *self.tx)
            .await
            .map_err(RouterError::from_query_error)?;
        self.writes_occurred = true;
        Ok(result)
    }

    /// [`exec`](Self::exec) with bound arguments.
    pub async fn exec_with(&mut self, sql: &str, args: PgArguments) -> Result<PgQueryResult> {
        let result = sqlx::query_with(sql, args)
            .execute(&mut *self.tx)
            .await
            .map_err(RouterError::from_query_error)?;
        self.writes_occurred = true;
        Ok(result)
    }

    /// Executes a statement returning rows on the pinned primary. A
    /// row-returning write (`RETURNING`) marks the transaction as writing.
    pub async fn query(&mut self, sql: &str) -> Result<Vec<PgRow>> {
        let is_write = self.classifier.classify(sql) == QueryKind::Write;
        let rows = sqlx::query(sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(RouterError::from_query_error)?;
        if is_write {
            self.writes_occurred = true;
        }
        Ok(rows)
    }

    /// [`query`](Self::query) with bound arguments.
    pub async fn query_with(&mut self, sql: &str, args: PgArguments) -> Result<Vec<PgRow>> {
        let is_write = self.classifier.classify(sql) == QueryKind::Write;
        let rows = sqlx::query_with(sql, args)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(RouterError::from_query_error)?;
        if is_write {
            self.writes_occurred = true;
        }
        Ok(rows)
    }

    /// Executes a statement expecting exactly one row.
    pub async fn query_row(&mut self, sql: &str) -> Result<PgRow> {
        let is_write = self.classifier.classify(sql) == QueryKind::Write;
        let row = sqlx::query(sql)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(RouterError::from_query_error)?;
        if is_write {
            self.writes_occurred = true;
        }
        Ok(row)
    }

    /// Commits, then captures the primary's WAL position when the
    /// transaction wrote. The capture is best-effort: failing it degrades
    /// consistency, not the commit.
    pub async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(RouterError::from_query_error)?;

        if self.writes_occurred {
            if let Err(err) = self
                .router
                .update_after_write(&self.ctx, &self.backend)
                .await
            {
                warn!(
                    backend = %self.backend.id(),
                    error = %err,
                    "failed to capture LSN after commit"
                );
            }
        }
        Ok(())
    }

    /// Rolls back. No LSN is captured and no cookie will be emitted for
    /// this transaction.
    pub async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(RouterError::from_query_error)
    }
}
