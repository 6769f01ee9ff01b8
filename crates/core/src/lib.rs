//! Domain rules for the fetch control plane.
//!
//! Everything in this crate is pure: no database, no network, no runtime.
//! The `db` and `api` crates build on these types and functions so that the
//! state machine, signing scheme, retry policy, and worker selection rules
//! exist in exactly one place.

pub mod audit;
pub mod callback_auth;
pub mod dispatch;
pub mod error;
pub mod job_state;
pub mod progress;
pub mod roles;
pub mod source;
pub mod status;
pub mod types;
pub mod worker_pool;
