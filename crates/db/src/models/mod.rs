//! Domain model structs and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct matching
//! the database row, plus the DTOs its repository accepts.

pub mod audit;
pub mod callback;
pub mod dispatch;
pub mod dlq;
pub mod event;
pub mod job;
pub mod status;
pub mod worker;
