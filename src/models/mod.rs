//! Data models for the flight oracle node

pub mod oracle;

pub use oracle::*;
