use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use sqlx::PgPool;

static NEXT_BACKEND_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a backend for the lifetime of the process.
///
/// Probe registry entries are keyed by this id, so two handles wrapping the
/// same logical backend share one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendId(u64);

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendRole {
    Primary,
    Replica,
}

/// Handle to one primary or replica connection pool.
///
/// Handles are cheap to clone; the pool itself is shared. The router borrows
/// handles per routing decision and never retains or closes them — the
/// enclosing façade owns their lifetime.
#[derive(Clone)]
pub struct Backend {
    id: BackendId,
    role: BackendRole,
    pool: PgPool,
}

impl Backend {
    pub fn new(role: BackendRole, pool: PgPool) -> Self {
        Self {
            id: BackendId(NEXT_BACKEND_ID.fetch_add(1, Ordering::Relaxed)),
            role,
            pool,
        }
    }

    pub fn primary(pool: PgPool) -> Self {
        Self::new(BackendRole::Primary, pool)
    }

    pub fn replica(pool: PgPool) -> Self {
        Self::new(BackendRole::Replica, pool)
    }

    pub fn id(&self) -> BackendId {
        self.id
    }

    pub fn role(&self) -> BackendRole {
        self.role
    }

    pub fn is_primary(&self) -> bool {
        self.role == BackendRole::Primary
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Point-in-time pool counters.
    pub fn stats(&self) -> BackendStats {
        BackendStats {
            id: self.id,
            role: self.role,
            size: self.pool.size(),
            idle: self.pool.num_idle(),
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("id", &self.id)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Connection counters for one backend pool.
#[derive(Debug, Clone)]
pub struct BackendStats {
    pub id: BackendId,
    pub role: BackendRole,
    pub size: u32,
    pub idle: usize,
}

impl fmt::Display for BackendStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}): {} connections, {} idle",
            self.id, self.role, self.size, self.idle
        )
    }
}
