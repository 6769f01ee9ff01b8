//! Live job streams at `GET /api/v1/jobs/{id}/stream`: the upgrade handler,
//! the connection registry, and keepalive pings.

mod handler;
pub mod keepalive;
pub mod manager;

pub use handler::job_stream;
pub use manager::WsManager;
