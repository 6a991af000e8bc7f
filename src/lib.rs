pub mod alvys;
pub mod config;
pub mod db;
pub mod error;
pub mod interval;
pub mod pipeline;
pub mod utils;
