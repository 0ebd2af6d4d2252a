pub mod oracle_client;
pub mod retry;

pub use oracle_client::OracleClient;
