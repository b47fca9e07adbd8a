//! Domain layer: configuration and pure text rules.

pub mod config;
pub mod message;
