pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod idempotency;
pub mod lifecycle;
pub mod provider;
pub mod reconciler;
pub mod store;
pub mod sweeps;
pub mod types;

#[cfg(test)]
pub mod testutil;
