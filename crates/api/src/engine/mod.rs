//! Job execution engine.
//!
//! - [`dispatcher`] -- queue consumers that hand jobs to workers, with
//!   bounded retries and dead-lettering.
//! - [`worker_client`] -- outbound start/cancel calls to workers.
//! - [`progress`] -- one actor per job owning its live snapshot and
//!   subscribers.
//! - [`callback_dedup`] -- short-lived memory of callback sequence numbers.
//! - [`lifecycle`] -- cancel and force-fail shared by user and operator routes.

pub mod callback_dedup;
pub mod dispatcher;
pub mod lifecycle;
pub mod progress;
pub mod worker_client;
