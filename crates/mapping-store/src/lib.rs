//! Persisted item -> scanner target mapping, shared by every sync run.

mod file;
mod models;

pub use file::{now_rfc3339, MappingFile};
pub use models::*;
