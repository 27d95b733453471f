use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::time::timeout;

use crate::core::{Result, RouterError};
use crate::lsn::Lsn;

/// Statement that reads the current WAL write position. Defined on a
/// primary; a replica rejects it, which callers treat as "not a primary".
pub const CURRENT_WAL_LSN_SQL: &str = "SELECT pg_current_wal_lsn()";

/// Statement that reads the last WAL position a replica has applied.
pub const LAST_REPLAY_LSN_SQL: &str = "SELECT pg_last_wal_replay_lsn()";

/// WAL-position discovery against one backend.
///
/// This is the seam the router talks through; tests substitute their own
/// implementations. Probes hold no per-call state and never cache — a cached
/// replay position would defeat the freshness check.
#[async_trait]
pub trait LsnProbe: Send + Sync {
    /// Current WAL write position of a primary.
    async fn current_wal_lsn(&self) -> Result<Lsn>;

    /// Last replayed WAL position of a replica.
    async fn last_replay_lsn(&self) -> Result<Lsn>;

    /// Signed byte delta `to - from`, computed server-side.
    async fn wal_lsn_diff(&self, from: Lsn, to: Lsn) -> Result<i64>;
}

/// Production probe backed by a backend's connection pool.
///
/// Every query is bounded by the configured deadline; a timeout or driver
/// error surfaces as a transient failure the router maps to "lagging".
pub struct PgLsnProbe {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgLsnProbe {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    async fn fetch_lsn(&self, sql: &str) -> Result<Lsn> {
        let query = sqlx::query_scalar::<_, Lsn>(sql).fetch_one(&self.pool);
        match timeout(self.query_timeout, query).await {
            Ok(Ok(lsn)) => Ok(lsn),
            Ok(Err(err)) => Err(RouterError::ProbeFailed(err)),
            Err(_) => Err(RouterError::ProbeTimeout),
        }
    }

    /// Bytes of WAL the replica behind this probe still has to apply to
    /// reach `primary_lsn`.
    pub async fn replication_lag(&self, primary_lsn: Lsn) -> Result<u64> {
        let replay = self.last_replay_lsn().await?;
        Ok(primary_lsn.saturating_sub(replay))
    }

    /// Whether the replica behind this probe has replayed at least
    /// `required`.
    pub async fn is_caught_up(&self, required: Lsn) -> Result<bool> {
        let replay = self.last_replay_lsn().await?;
        Ok(replay >= required)
    }
}

#[async_trait]
impl LsnProbe for PgLsnProbe {
    async fn current_wal_lsn(&self) -> Result<Lsn> {
        self.fetch_lsn(CURRENT_WAL_LSN_SQL).await
    }

    async fn last_replay_lsn(&self) -> Result<Lsn> {
        self.fetch_lsn(LAST_REPLAY_LSN_SQL).await
    }

    async fn wal_lsn_diff(&self, from: Lsn, to: Lsn) -> Result<i64> {
        // pg_wal_lsn_diff returns numeric; the cast pins an integer wire
        // type. LSNs render as hex so they cannot escape the literal.
        let sql = format!("SELECT pg_wal_lsn_diff('{to}'::pg_lsn, '{from}'::pg_lsn)::bigint");
        let query = sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool);
        match timeout(self.query_timeout, query).await {
            Ok(Ok(delta)) => Ok(delta),
            Ok(Err(err)) => Err(RouterError::ProbeFailed(err)),
            Err(_) => Err(RouterError::ProbeTimeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_statements_are_verbatim() {
        assert_eq!(CURRENT_WAL_LSN_SQL, "SELECT pg_current_wal_lsn()");
        assert_eq!(LAST_REPLAY_LSN_SQL, "SELECT pg_last_wal_replay_lsn()");
    }

    #[test]
    fn diff_statement_interpolates_canonical_lsns() {
        let from: Lsn = "0/3000060".parse().unwrap();
        let to: Lsn = "1/A0".parse().unwrap();
        let sql = format!("SELECT pg_wal_lsn_diff('{to}'::pg_lsn, '{from}'::pg_lsn)::bigint");
        assert_eq!(
            sql,
            "SELECT pg_wal_lsn_diff('1/A0'::pg_lsn, '0/3000060'::pg_lsn)::bigint"
        );
    }

    #[tokio::test]
    async fn probe_times_out_against_unreachable_backend() {
        // connect_lazy defers I/O; the first query then stalls on connect
        // and the probe deadline has to cut it short.
        let pool = PgPool::connect_lazy("postgres://10.255.255.1:5432/nowhere").unwrap();
        let probe = PgLsnProbe::new(pool, Duration::from_millis(50));

        match probe.current_wal_lsn().await {
            Err(RouterError::ProbeTimeout) | Err(RouterError::ProbeFailed(_)) => {}
            other => panic!("expected a transient probe failure, got {other:?}"),
        }
    }
}
