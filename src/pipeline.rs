use std::{collections::BTreeMap, fmt, time::Duration};

use duckdb::{AccessMode, Connection};
use jiff::Timestamp;
use log::{error, info, warn};
use tabled::{builder::Builder, settings::Style};

use crate::{
    alvys::{
        auth::{TenantContext, Token, TokenManager},
        entity::Entity,
        export::Exporter,
        transport::{ReqwestTransport, Transport},
    },
    config::Config,
    db::{
        alvys::{
            archive::{AlvysArchive, ExportArtifact},
            loader::{schema_name, EntityLoad, Loader},
        },
        clients::{CredentialStore, SkippedTenant},
    },
    error::{FailureKind, IngestError},
    interval::week::{compute_week_ago, TimeWindow},
    utils::lib_duckdb::open_with_retry,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Export to artifacts only.
    Export,
    /// Load existing artifacts only.
    Insert,
    ExportInsert,
}

impl Mode {
    pub fn exports(&self) -> bool {
        matches!(self, Mode::Export | Mode::ExportInsert)
    }

    pub fn loads(&self) -> bool {
        matches!(self, Mode::Insert | Mode::ExportInsert)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Export => write!(f, "export"),
            Mode::Insert => write!(f, "insert"),
            Mode::ExportInsert => write!(f, "export-insert"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunRequest {
    pub mode: Mode,
    pub entities: Vec<Entity>,
    pub weeks_ago: u32,
    pub dry_run: bool,
    /// The instant the week is computed from.
    pub now: Timestamp,
}

impl RunRequest {
    pub fn new(mode: Mode, entities: Vec<Entity>) -> Self {
        RunRequest {
            mode,
            entities,
            weeks_ago: 0,
            dry_run: false,
            now: Timestamp::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// `exported` is the record count when this run exported the entity,
    /// `loaded` the load result when it loaded it.
    Success {
        exported: Option<usize>,
        loaded: Option<EntityLoad>,
    },
    Skipped(String),
    Failed { kind: FailureKind, message: String },
}

impl Outcome {
    fn failed(e: &IngestError) -> Self {
        Outcome::Failed {
            kind: e.kind(),
            message: e.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

#[derive(Clone, Debug)]
pub struct PairResult {
    pub scac: String,
    pub entity: Entity,
    pub outcome: Outcome,
}

/// Outcome of every tenant/entity pair of a run.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub window: TimeWindow,
    pub results: Vec<PairResult>,
    /// Roster rows that could not be used.
    pub roster_warnings: Vec<SkippedTenant>,
}

impl RunSummary {
    pub fn new(window: TimeWindow) -> Self {
        RunSummary {
            window,
            results: Vec::new(),
            roster_warnings: Vec::new(),
        }
    }

    fn push(&mut self, scac: &str, entity: Entity, outcome: Outcome) {
        self.results.push(PairResult {
            scac: scac.to_string(),
            entity,
            outcome,
        });
    }

    pub fn outcome(&self, scac: &str, entity: Entity) -> Option<&Outcome> {
        self.results
            .iter()
            .find(|r| r.scac == scac && r.entity == entity)
            .map(|r| &r.outcome)
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn skipped(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Skipped(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_failed()).count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    /// One line per failed pair.
    pub fn failure_report(&self) -> String {
        self.results
            .iter()
            .filter_map(|r| match &r.outcome {
                Outcome::Failed { kind, message } => {
                    Some(format!("[{}] {} ({}): {}", r.scac, r.entity, kind, message))
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn ascii_table(&self) -> tabled::Table {
        let mut builder = Builder::new();
        builder.push_record(vec![
            "SCAC", "Entity", "Outcome", "Exported", "Inserted", "Updated", "Skipped", "Detail",
        ]);
        for r in &self.results {
            let (outcome, exported, load, detail) = match &r.outcome {
                Outcome::Success { exported, loaded } => {
                    ("success", *exported, loaded.as_ref().map(|l| l.summary), String::new())
                }
                Outcome::Skipped(reason) => ("skipped", None, None, reason.clone()),
                Outcome::Failed { kind, message } => {
                    ("failed", None, None, format!("{}: {}", kind, message))
                }
            };
            let show = |v: Option<u64>| v.map(|n| n.to_string()).unwrap_or_default();
            builder.push_record(vec![
                r.scac.clone(),
                r.entity.to_string(),
                outcome.to_string(),
                show(exported.map(|n| n as u64)),
                show(load.map(|s| s.inserted)),
                show(load.map(|s| s.updated)),
                show(load.map(|s| s.skipped)),
                detail,
            ]);
        }
        let mut table = builder.build();
        table.with(Style::sharp());
        table
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "week {}: {} succeeded, {} skipped, {} failed",
            self.window,
            self.succeeded(),
            self.skipped(),
            self.failed()
        )?;
        if !self.roster_warnings.is_empty() {
            let scacs: Vec<&str> = self.roster_warnings.iter().map(|s| s.scac.as_str()).collect();
            write!(f, ", roster skipped {}", scacs.join(", "))?;
        }
        Ok(())
    }
}

/// Drives export and load for every tenant and entity of a run.  One
/// tenant at a time, one entity at a time, on a single DuckDB connection.
pub struct Pipeline<T: Transport> {
    config: Config,
    transport: T,
    conn: Connection,
    archive: AlvysArchive,
}

impl Pipeline<ReqwestTransport> {
    /// Production pipeline: blocking HTTP client and the configured DuckDB file.
    pub fn open(config: Config) -> Result<Self, IngestError> {
        let transport = ReqwestTransport::new(config.http_timeout)?;
        let conn = open_with_retry(
            &config.duckdb_path,
            8,
            Duration::from_millis(25),
            AccessMode::ReadWrite,
        )?;
        Ok(Pipeline::new(config, transport, conn))
    }
}

impl<T: Transport> Pipeline<T> {
    pub fn new(config: Config, transport: T, conn: Connection) -> Self {
        let archive = AlvysArchive::new(config.data_dir.clone());
        Pipeline {
            config,
            transport,
            conn,
            archive,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn archive(&self) -> &AlvysArchive {
        &self.archive
    }

    fn window(&self, req: &RunRequest) -> Result<TimeWindow, IngestError> {
        compute_week_ago(req.now, &self.config.timezone, req.weeks_ago)
    }

    /// Run every tenant of the roster.  Only configuration and roster errors
    /// fail the call; tenant and entity failures end up in the summary.
    pub fn run_all(&mut self, req: &RunRequest) -> Result<RunSummary, IngestError> {
        let window = self.window(req)?;
        let roster = CredentialStore::new(&self.conn)
            .with_allow_list(self.config.scacs.clone())
            .list_tenants()?;
        info!(
            "Starting {} of {} for {} tenants, week {}",
            req.mode,
            req.entities.iter().map(|e| e.as_str()).collect::<Vec<_>>().join(","),
            roster.tenants.len(),
            window
        );
        let mut summary = RunSummary::new(window.clone());
        summary.roster_warnings = roster.skipped;
        for tenant in &roster.tenants {
            self.run_tenant(&tenant.scac, Some(tenant), &window, req, &mut summary);
        }
        info!("Finished: {}", summary);
        Ok(summary)
    }

    /// Run a single tenant.  Credentials come from the environment override
    /// when set, otherwise from the roster.  Loading alone needs none.
    pub fn run_scac(&mut self, scac: &str, req: &RunRequest) -> Result<RunSummary, IngestError> {
        let scac = schema_name(scac)?;
        let window = self.window(req)?;
        let tenant = if req.mode.exports() {
            Some(self.resolve_tenant(&scac)?)
        } else {
            None
        };
        let mut summary = RunSummary::new(window.clone());
        self.run_tenant(&scac, tenant.as_ref(), &window, req, &mut summary);
        info!("Finished: {}", summary);
        Ok(summary)
    }

    fn resolve_tenant(&self, scac: &str) -> Result<TenantContext, IngestError> {
        match &self.config.tenant_override {
            Some(tenant) => Ok(tenant.with_scac(scac)),
            None => CredentialStore::new(&self.conn).tenant(scac),
        }
    }

    fn run_tenant(
        &mut self,
        scac: &str,
        tenant: Option<&TenantContext>,
        window: &TimeWindow,
        req: &RunRequest,
        summary: &mut RunSummary,
    ) {
        if req.dry_run {
            for entity in &req.entities {
                info!("[{}] {}: dry run, would {} week {}", scac, entity, req.mode, window);
                summary.push(scac, *entity, Outcome::Skipped("dry run".into()));
            }
            return;
        }

        let mut exported: BTreeMap<Entity, usize> = BTreeMap::new();
        let mut failed: BTreeMap<Entity, Outcome> = BTreeMap::new();
        if req.mode.exports() {
            match tenant {
                Some(tenant) => self.export_tenant(
                    tenant,
                    window,
                    &req.entities,
                    req.mode.loads(),
                    &mut exported,
                    &mut failed,
                ),
                None => {
                    let e = IngestError::Config(format!("no credentials for {}", scac));
                    for entity in &req.entities {
                        failed.insert(*entity, Outcome::failed(&e));
                    }
                }
            }
        }

        for entity in &req.entities {
            let outcome = if let Some(outcome) = failed.remove(entity) {
                outcome
            } else if req.mode.loads() {
                match self.load_entity(scac, *entity) {
                    Ok(Some(loaded)) => Outcome::Success {
                        exported: exported.get(entity).copied(),
                        loaded: Some(loaded),
                    },
                    Ok(None) => {
                        warn!("[{}] {}: no export artifact to load", scac, entity);
                        Outcome::Skipped("no export artifact".into())
                    }
                    Err(e) => {
                        error!("[{}] {}: {}", scac, entity, e);
                        Outcome::failed(&e)
                    }
                }
            } else {
                Outcome::Success {
                    exported: exported.get(entity).copied(),
                    loaded: None,
                }
            };
            summary.push(scac, *entity, outcome);
        }
    }

    /// Export all entities of a tenant to artifacts.  Nothing is loaded
    /// here, so an entity that fails never leaves partial rows behind.
    ///
    /// With `clear_stale` the older artifacts of these entities are removed
    /// first, so the load that follows sees this week only.  Without it,
    /// artifacts of other weeks are kept for a later insert.
    fn export_tenant(
        &self,
        tenant: &TenantContext,
        window: &TimeWindow,
        entities: &[Entity],
        clear_stale: bool,
        exported: &mut BTreeMap<Entity, usize>,
        failed: &mut BTreeMap<Entity, Outcome>,
    ) {
        let scac = tenant.scac.as_str();
        let fail_all = |failed: &mut BTreeMap<Entity, Outcome>, e: &IngestError| {
            error!("[{}] {}", scac, e);
            for entity in entities {
                failed.insert(*entity, Outcome::failed(e));
            }
        };
        if clear_stale {
            if let Err(e) = self.archive.clear(scac, entities) {
                fail_all(failed, &e);
                return;
            }
        }

        let retry = self.config.retry.clone();
        let tokens = TokenManager::new(&self.transport, &self.config.api_base, retry.clone());
        let mut token: Token = match tokens.acquire_token(tenant) {
            Ok(token) => token,
            Err(e) => {
                fail_all(failed, &e);
                return;
            }
        };
        let exporter = Exporter::new(
            &self.transport,
            &self.config.api_base,
            self.config.page_size,
            retry,
        );

        for entity in entities {
            if token.is_expired(Timestamp::now()) {
                info!("[{}] {}: token expired, acquiring a new one", scac, entity);
                token = match tokens.acquire_token(tenant) {
                    Ok(token) => token,
                    Err(e) => {
                        error!("[{}] {}: {}", scac, entity, e);
                        failed.insert(*entity, Outcome::failed(&e));
                        continue;
                    }
                };
            }
            let result = exporter
                .export(scac, &token, *entity, window)
                .and_then(|records| {
                    let n = records.len();
                    let artifact =
                        ExportArtifact::new(scac, *entity, window, records, Timestamp::now());
                    self.archive.write(&artifact, window).map(|_| n)
                });
            match result {
                Ok(n) => {
                    exported.insert(*entity, n);
                }
                Err(e) => {
                    error!("[{}] {}: {}", scac, entity, e);
                    failed.insert(*entity, Outcome::failed(&e));
                }
            }
        }
    }

    /// Load every artifact of an entity.  `None` when there is nothing to load.
    fn load_entity(
        &mut self,
        scac: &str,
        entity: Entity,
    ) -> Result<Option<EntityLoad>, IngestError> {
        let paths = self.archive.artifacts(scac, entity)?;
        if paths.is_empty() {
            return Ok(None);
        }
        let mut total = EntityLoad::default();
        let mut loader = Loader::new(&mut self.conn);
        for path in paths {
            let artifact = self.archive.read(&path)?;
            info!(
                "[{}] {}: loading {} records from {}",
                scac,
                entity,
                artifact.records.len(),
                path.display()
            );
            total += loader.load(scac, entity, &artifact.records, &artifact.file_id)?;
        }
        Ok(Some(total))
    }
}
