//! Role names carried in access tokens issued by the session service.

/// Operators: DLQ replay, fleet console, job overrides.
pub const ROLE_ADMIN: &str = "admin";

/// Regular end users submitting fetch jobs.
pub const ROLE_USER: &str = "user";
