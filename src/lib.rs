
pub mod config;
pub mod constants;
pub mod correction;
pub mod timestamp;
