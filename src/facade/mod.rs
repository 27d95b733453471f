// ============================================================================
// Routing façade
// ============================================================================

pub mod database;
pub mod statements;
pub mod transactions;

pub use database::{ResolverDb, ResolverDbBuilder};
pub use statements::PreparedStatement;
pub use transactions::Transaction;
