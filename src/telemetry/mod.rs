//! Tolerant projection of instance trigger responses into flat telemetry
//! rows (§4.6).

pub mod parser;
