//! Flight Oracles Library
//!
//! Oracle coordination core for flight-status requests: registers a pool of
//! oracles with index labels, matches incoming requests to the oracles
//! authorized to answer them, and fans their proposals out to the ledger,
//! where a quorum tally settles the verdict.

pub mod app_state;
pub mod config;
pub mod error;
pub mod event_listener;
pub mod models;
pub mod services;
