//! Authentication primitives.
//!
//! - [`jwt`] -- access-token validation (tokens are issued by the auth service).

pub mod jwt;
