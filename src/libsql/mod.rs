//! `LibSQL` driver glue (local or remote).
//!
//! - `params`: conversion between [`RowValues`](crate::types::RowValues) and libsql values
//! - `query`: result extraction and building
//! - `executor`: raw, unaudited statement execution against a connection

pub mod executor;
pub mod params;
pub mod query;

pub use executor::{execute_batch, execute_dml, execute_select};
pub use params::Params;
pub use query::build_result_set;
