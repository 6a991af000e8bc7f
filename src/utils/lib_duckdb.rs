use std::time::Duration;

use duckdb::{AccessMode, Config, Connection};
use log::warn;

/// Open a DuckDB connection, retrying while another process holds the lock.
/// Suggested `max_attempts = 8`, `initial_wait = Duration::from_millis(25)`.
pub fn open_with_retry(
    duckdb_path: &str,
    max_attempts: u32,
    initial_wait: Duration,
    access_mode: AccessMode,
) -> Result<Connection, duckdb::Error> {
    let mut attempts = 0;
    let mut wait_duration = initial_wait;

    loop {
        let mode = match &access_mode {
            AccessMode::Automatic => AccessMode::Automatic,
            AccessMode::ReadOnly => AccessMode::ReadOnly,
            AccessMode::ReadWrite => AccessMode::ReadWrite,
        };
        let config = Config::default().access_mode(mode)?;
        match Connection::open_with_flags(duckdb_path, config) {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                attempts += 1;
                if attempts >= max_attempts {
                    return Err(e);
                }
                warn!(
                    "Retrying DuckDB open of {} after error: {} (attempt {}/{})",
                    duckdb_path, e, attempts, max_attempts
                );
                std::thread::sleep(wait_duration);
                wait_duration *= 2;
            }
        }
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
