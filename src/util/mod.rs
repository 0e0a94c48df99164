//! Utility modules: configuration loading and logger setup

pub mod config;
pub mod logger;
