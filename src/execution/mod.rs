// Order execution module
pub mod executor;

pub use executor::{ExecutionError, FailurePolicy, GridExecutor, RunReport};
