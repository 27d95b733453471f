// ============================================================================
// pgresolver Library
// ============================================================================

//! Read-your-writes routing for PostgreSQL primary/replica topologies.
//!
//! Applications issue reads and writes through a single façade; per
//! statement, the layer decides whether a primary or a replica serves it,
//! such that a client never observes data older than its own most recent
//! write — even under asynchronous replication lag.
//!
//! The mechanism is PostgreSQL's WAL position (LSN): after every successful
//! write the layer captures `pg_current_wal_lsn()` from the primary that
//! performed it; before serving a causal read from a replica it checks
//! `pg_last_wal_replay_lsn()` against the caller's requirement and falls
//! back to the primary while the replica is behind. Across HTTP requests
//! the requirement travels in a cookie.
//!
//! ```ignore
//! use pgresolver::{CausalContext, ResolverDb, RouterConfig};
//!
//! let db = ResolverDb::new(
//!     vec![primary_pool],
//!     vec![replica_a, replica_b],
//!     RouterConfig::new().enabled(true),
//! )?;
//!
//! let ctx = CausalContext::new();
//! db.exec(&ctx, "INSERT INTO orders (sku) VALUES ('boots')").await?;
//! // Routed to the primary unless a replica has already replayed the write:
//! let rows = db.query(&ctx, "SELECT * FROM orders").await?;
//! ```

pub mod backend;
pub mod balancer;
pub mod config;
pub mod context;
pub mod core;
pub mod facade;
pub mod lsn;
pub mod query;
pub mod router;
pub mod web;

// Re-export the main types for convenience
pub use crate::core::{is_connection_error, Result, RouterError};

pub use backend::{Backend, BackendId, BackendRole, BackendStats};
pub use balancer::{LoadBalance, LoadBalancerPolicy, Random, RoundRobin};
pub use config::{ConsistencyLevel, RouterConfig, DEFAULT_COOKIE_NAME};
pub use context::{CausalContext, CausalToken};
pub use facade::{PreparedStatement, ResolverDb, ResolverDbBuilder, Transaction};
pub use lsn::probe::{LsnProbe, PgLsnProbe};
pub use lsn::registry::{PgProbeFactory, ProbeFactory, ProbeRegistry};
pub use lsn::Lsn;
pub use query::{QueryClassifier, QueryKind, RegexQueryClassifier};
pub use router::{BackendProvider, CausalRouter, PassthroughRouter, QueryRouter};
pub use web::{causal_middleware, lsn_from_cookie_header, set_causal_cookie};
