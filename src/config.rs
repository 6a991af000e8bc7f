use std::{collections::HashMap, env, path::Path, path::PathBuf, time::Duration};

use jiff::tz::TimeZone;
use log::info;

use crate::{
    alvys::{auth::TenantContext, entity::Entity, retry::RetryPolicy},
    error::IngestError,
    interval::week::timezone,
};

pub const DEFAULT_API_BASE: &str = "https://integrations.alvys.com";
pub const DEFAULT_DATA_DIR: &str = "alvys_weekly_data";
pub const DEFAULT_TIMEZONE: &str = "America/Chicago";
pub const DEFAULT_PAGE_SIZE: u32 = 200;

#[derive(Clone, Debug)]
pub struct Config {
    pub duckdb_path: String,
    pub data_dir: PathBuf,
    pub timezone_name: String,
    pub timezone: TimeZone,
    pub api_base: String,
    pub entities: Vec<Entity>,
    /// When set, only these SCACs are processed.
    pub scacs: Option<Vec<String>>,
    pub http_timeout: Duration,
    pub retry: RetryPolicy,
    pub page_size: u32,
    pub alert_endpoint: Option<String>,
    /// Single tenant credentials for the manual path.
    pub tenant_override: Option<TenantContext>,
}

/// Load `.env/{env}.env` into the process environment if the file exists.
pub fn load_env_file(env: &str) -> Result<(), IngestError> {
    let path = format!(".env/{}.env", env);
    if Path::new(&path).exists() {
        dotenvy::from_path(Path::new(&path))
            .map_err(|e| IngestError::Config(format!("failed to read {}: {}", path, e)))?;
        info!("Loaded environment from {}", path);
    }
    Ok(())
}

impl Config {
    pub fn from_env() -> Result<Config, IngestError> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Config, IngestError> {
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, IngestError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let duckdb_path = get("ALVYS_DUCKDB_PATH")
            .ok_or_else(|| IngestError::Config("ALVYS_DUCKDB_PATH is not set".into()))?;
        let timezone_name = get("ALVYS_TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let timezone = timezone(&timezone_name)?;

        let entities = match get("ALVYS_ENTITIES") {
            Some(list) => {
                let names: Vec<&str> = list.split(',').map(str::trim).collect();
                Entity::normalise(&names)?
            }
            None => Entity::ALL.to_vec(),
        };

        let scacs = get("ALVYS_SCACS").map(|list| {
            list.split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        });

        let retry = RetryPolicy {
            max_attempts: parse_number(&get, "ALVYS_MAX_ATTEMPTS", 4)?,
            initial_backoff: Duration::from_millis(parse_number(&get, "ALVYS_RETRY_BACKOFF_MS", 500)?),
            ..RetryPolicy::default()
        };
        if retry.max_attempts == 0 {
            return Err(IngestError::Config("ALVYS_MAX_ATTEMPTS must be at least 1".into()));
        }
        let page_size = parse_number(&get, "ALVYS_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        if page_size == 0 {
            return Err(IngestError::Config("ALVYS_PAGE_SIZE must be at least 1".into()));
        }

        let tenant_override = match get("ALVYS_TENANT_ID") {
            Some(tenant_id) => Some(TenantContext::new(
                "",
                &tenant_id,
                &get("ALVYS_CLIENT_ID").ok_or_else(|| {
                    IngestError::Config("ALVYS_TENANT_ID is set but ALVYS_CLIENT_ID is not".into())
                })?,
                &get("ALVYS_CLIENT_SECRET").ok_or_else(|| {
                    IngestError::Config(
                        "ALVYS_TENANT_ID is set but ALVYS_CLIENT_SECRET is not".into(),
                    )
                })?,
                &get("ALVYS_GRANT_TYPE").unwrap_or_else(|| "client_credentials".to_string()),
            )),
            None => None,
        };

        Ok(Config {
            duckdb_path,
            data_dir: PathBuf::from(
                get("ALVYS_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            ),
            timezone_name,
            timezone,
            api_base: get("ALVYS_API_BASE")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            entities,
            scacs,
            http_timeout: Duration::from_secs(parse_number(&get, "ALVYS_HTTP_TIMEOUT_SECS", 60)?),
            retry,
            page_size,
            alert_endpoint: get("ALVYS_ALERT_ENDPOINT"),
            tenant_override,
        })
    }
}

fn parse_number<T, F>(get: &F, key: &str, default: T) -> Result<T, IngestError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => v
            .parse::<T>()
            .map_err(|e| IngestError::Config(format!("invalid {}={:?}: {}", key, v, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults() -> Result<(), Box<dyn Error>> {
        let config = Config::from_map(&vars(&[("ALVYS_DUCKDB_PATH", "/tmp/alvys.duckdb")]))?;
        assert_eq!(config.timezone_name, "America/Chicago");
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.entities, Entity::ALL.to_vec());
        assert_eq!(config.page_size, 200);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(500));
        assert_eq!(config.http_timeout, Duration::from_secs(60));
        assert!(config.scacs.is_none());
        assert!(config.tenant_override.is_none());
        Ok(())
    }

    #[test]
    fn overrides() -> Result<(), Box<dyn Error>> {
        let config = Config::from_map(&vars(&[
            ("ALVYS_DUCKDB_PATH", "/tmp/alvys.duckdb"),
            ("ALVYS_TIMEZONE", "America/Denver"),
            ("ALVYS_ENTITIES", "trips, loads"),
            ("ALVYS_SCACS", "abcd,efgh"),
            ("ALVYS_API_BASE", "http://localhost:8080/"),
            ("ALVYS_TENANT_ID", "t-1"),
            ("ALVYS_CLIENT_ID", "c-1"),
            ("ALVYS_CLIENT_SECRET", "s-1"),
        ]))?;
        assert_eq!(config.entities, vec![Entity::Loads, Entity::Trips]);
        assert_eq!(config.scacs, Some(vec!["ABCD".to_string(), "EFGH".to_string()]));
        assert_eq!(config.api_base, "http://localhost:8080");
        let tenant = config.tenant_override.unwrap();
        assert_eq!(tenant.tenant_id, "t-1");
        assert_eq!(tenant.grant_type, "client_credentials");
        Ok(())
    }

    #[test]
    fn invalid_values() {
        let missing = Config::from_map(&vars(&[]));
        assert!(matches!(missing, Err(IngestError::Config(_))));
        let bad_tz = Config::from_map(&vars(&[
            ("ALVYS_DUCKDB_PATH", "x.duckdb"),
            ("ALVYS_TIMEZONE", "Nowhere/Land"),
        ]));
        assert!(matches!(bad_tz, Err(IngestError::Config(_))));
        let bad_page = Config::from_map(&vars(&[
            ("ALVYS_DUCKDB_PATH", "x.duckdb"),
            ("ALVYS_PAGE_SIZE", "lots"),
        ]));
        assert!(matches!(bad_page, Err(IngestError::Config(_))));
        let bad_entity = Config::from_map(&vars(&[
            ("ALVYS_DUCKDB_PATH", "x.duckdb"),
            ("ALVYS_ENTITIES", "loads,shipments"),
        ]));
        assert!(matches!(bad_entity, Err(IngestError::Config(_))));
    }
}
