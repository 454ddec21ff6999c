pub mod btle;
pub mod connection;
pub mod constants;
pub mod tasks;
pub mod transport;
pub mod types;
