pub mod forecast_api;
pub mod market_api;
pub mod observations;
pub mod sources;
pub mod types;
