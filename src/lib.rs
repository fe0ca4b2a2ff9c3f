pub mod error;
pub mod workload;
