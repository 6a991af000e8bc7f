use std::fmt;

use duckdb::Connection;
use log::{info, warn};

use crate::{alvys::auth::TenantContext, db::alvys::loader::schema_name, error::IngestError};

pub const CLIENTS_TABLE: &str = "ALVYS_CLIENTS";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Credential fields that are NULL or blank.
    Missing(Vec<&'static str>),
    /// The SCAC can't name a schema or a directory.
    InvalidScac,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Missing(fields) => write!(f, "missing {}", fields.join(", ")),
            SkipReason::InvalidScac => write!(f, "invalid SCAC"),
        }
    }
}

/// A roster row that can't be used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedTenant {
    pub scac: String,
    pub reason: SkipReason,
}

#[derive(Debug, Default)]
pub struct Roster {
    pub tenants: Vec<TenantContext>,
    pub skipped: Vec<SkippedTenant>,
}

/// Reads tenant credentials from the `ALVYS_CLIENTS` table.
pub struct CredentialStore<'c> {
    conn: &'c Connection,
    allow: Option<Vec<String>>,
}

struct ClientRow {
    scac: Option<String>,
    tenant_id: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    grant_type: Option<String>,
}

impl ClientRow {
    fn scac(&self) -> String {
        self.scac.as_deref().unwrap_or("").trim().to_uppercase()
    }

    fn missing(&self) -> Vec<&'static str> {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        let mut out = Vec::new();
        if blank(&self.tenant_id) {
            out.push("TENANT_ID");
        }
        if blank(&self.client_id) {
            out.push("CLIENT_ID");
        }
        if blank(&self.client_secret) {
            out.push("CLIENT_SECRET");
        }
        if blank(&self.grant_type) {
            out.push("GRANT_TYPE");
        }
        out
    }

    fn to_tenant(&self) -> TenantContext {
        let s = |v: &Option<String>| v.clone().unwrap_or_default();
        TenantContext::new(
            &self.scac(),
            &s(&self.tenant_id),
            &s(&self.client_id),
            &s(&self.client_secret),
            &s(&self.grant_type),
        )
    }
}

impl<'c> CredentialStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        CredentialStore { conn, allow: None }
    }

    /// Restrict the roster to these SCACs.
    pub fn with_allow_list(mut self, scacs: Option<Vec<String>>) -> Self {
        self.allow = scacs.map(|v| v.into_iter().map(|s| s.trim().to_uppercase()).collect());
        self
    }

    pub fn create_table(conn: &Connection) -> Result<(), duckdb::Error> {
        conn.execute_batch(&format!(
            r#"
CREATE TABLE IF NOT EXISTS {} (
    SCAC VARCHAR PRIMARY KEY,
    TENANT_ID VARCHAR,
    CLIENT_ID VARCHAR,
    CLIENT_SECRET VARCHAR,
    GRANT_TYPE VARCHAR
);"#,
            CLIENTS_TABLE
        ))
    }

    fn rows(&self) -> Result<Vec<ClientRow>, IngestError> {
        CredentialStore::create_table(self.conn)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT SCAC, TENANT_ID, CLIENT_ID, CLIENT_SECRET, GRANT_TYPE FROM {}",
            CLIENTS_TABLE
        ))?;
        let mut rows = stmt
            .query_map([], |row| {
                Ok(ClientRow {
                    scac: row.get(0)?,
                    tenant_id: row.get(1)?,
                    client_id: row.get(2)?,
                    client_secret: row.get(3)?,
                    grant_type: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.sort_by_key(|r| r.scac());
        Ok(rows)
    }

    fn allowed(&self, scac: &str) -> bool {
        self.allow
            .as_ref()
            .map_or(true, |list| list.iter().any(|s| s == scac))
    }

    /// All tenants with a valid SCAC and complete credentials.  Other rows
    /// are reported in `skipped` and logged, they never fail the call.
    pub fn list_tenants(&self) -> Result<Roster, IngestError> {
        let mut roster = Roster::default();
        for row in self.rows()? {
            let scac = row.scac();
            if scac.is_empty() || !self.allowed(&scac) {
                continue;
            }
            let missing = row.missing();
            let reason = if schema_name(&scac).is_err() {
                SkipReason::InvalidScac
            } else if !missing.is_empty() {
                SkipReason::Missing(missing)
            } else {
                roster.tenants.push(row.to_tenant());
                continue;
            };
            warn!("[{}] Skipping tenant, {}", scac, reason);
            roster.skipped.push(SkippedTenant { scac, reason });
        }
        info!(
            "Found {} tenants with credentials, {} skipped",
            roster.tenants.len(),
            roster.skipped.len()
        );
        Ok(roster)
    }

    /// Credentials of one tenant.  Fails with a configuration error when the
    /// SCAC is unknown or its row is incomplete.
    pub fn tenant(&self, scac: &str) -> Result<TenantContext, IngestError> {
        let scac = scac.trim().to_uppercase();
        let row = self
            .rows()?
            .into_iter()
            .find(|r| r.scac() == scac)
            .ok_or_else(|| IngestError::Config(format!("no credentials for SCAC {}", scac)))?;
        let missing = row.missing();
        if !missing.is_empty() {
            return Err(IngestError::Config(format!(
                "[{}] credentials incomplete, missing {}",
                scac,
                missing.join(", ")
            )));
        }
        Ok(row.to_tenant())
    }
}
