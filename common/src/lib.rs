pub mod constants;
pub mod error;
pub mod telemetry;
pub mod time_utils;
