pub mod changes;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod io;
pub mod outputs;
pub mod params;
pub mod plan;
pub mod registry;
pub mod retry;
pub mod types;
pub mod validate;

pub use error::{Result, StagehandError};
