pub mod error;

pub use error::{is_connection_error, Result, RouterError};
