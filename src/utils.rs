pub mod alerts;
pub mod lib_duckdb;
