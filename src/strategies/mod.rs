pub mod microstructure;
pub mod probability;
pub mod sizing;
pub mod types;
