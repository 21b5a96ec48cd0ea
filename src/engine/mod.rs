pub mod backtest;
pub mod scheduler;
pub mod task;
