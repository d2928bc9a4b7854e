//! Tax Rate Sync
//!
//! Pushes changed warehouse tax rates to the accounting platform's REST API
//! once a month, on the last calendar day.
//!
//! - [`scheduler`]: the polling loop and its month-end trigger
//! - [`orchestrator`]: one update cycle (select, log in, submit)
//! - [`secret`]: obfuscated config values
//! - [`payload`]: login and update request bodies
//! - [`gateway`]: HTTP access to the remote API
//! - [`store`]: warehouse tax rate records
//! - [`log_sink`]: the durable update log

pub mod config;
pub mod gateway;
pub mod log_sink;
pub mod logging;
pub mod orchestrator;
pub mod payload;
pub mod scheduler;
pub mod secret;
pub mod store;

#[cfg(test)]
mod test_support;
