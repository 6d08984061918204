// Ambient concerns shared by every layer: errors, settings and logging.

pub mod config;
pub mod error;
pub mod logging;

pub use error::{ImportError, StorageError};
