//! Background tasks spawned at start-up

pub mod log_flush;
pub mod rate_limit_sweep;
