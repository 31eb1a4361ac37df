//! Shared domain types for the testlab client platform.
//!
//! Job records, status/type enumerations, room naming, and the core
//! error enum consumed by the synchronization engine and its callers.

pub mod error;
pub mod job;
pub mod rooms;
pub mod types;

pub use error::CoreError;
pub use job::{Job, JobStatus, JobType};
pub use rooms::Room;
