pub mod executor;
pub mod persistence;
pub mod types;
