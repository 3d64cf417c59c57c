//! # Susu Shared Library
//!
//! This crate contains the domain models, database layer, and configuration
//! shared between the susu contribution-cycle engine and its operational
//! tooling.
//!
//! ## Module Organization
//!
//! - `models`: Database models (groups, members, payments, payouts, cycles, jobs)
//! - `db`: Connection pool and migration runner
//! - `config`: Environment-driven configuration

pub mod config;
pub mod db;
pub mod models;

/// Current version of the susu shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
