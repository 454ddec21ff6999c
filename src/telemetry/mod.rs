pub mod decoder;
pub mod metrics;
