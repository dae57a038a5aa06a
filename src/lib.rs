//! AltRead library exports

pub mod buffer;
pub mod cache;
pub mod config;
pub mod db;
pub mod effects;
pub mod error;
pub mod hasher;
pub mod log_writer;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod services;
pub mod state;
pub mod tasks;

#[cfg(test)]
mod test_support;
