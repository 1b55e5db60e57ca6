//! Core types: errors, configuration, interval parsing.

pub mod config;
pub mod duration;
pub mod errors;
