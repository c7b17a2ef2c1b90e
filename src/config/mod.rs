pub mod oracle;

pub use oracle::OracleConfig;
