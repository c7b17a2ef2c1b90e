//! Oracle coordination services

pub mod consensus_tally;
pub mod index_assignment;
pub mod ledger;
pub mod oracle_registry;
pub mod request_matcher;
pub mod response_generator;
pub mod submission_dispatcher;
