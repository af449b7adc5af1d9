//! Time-based cleaning of bins.

pub mod sweeper;

pub use sweeper::RetentionSweeper;
