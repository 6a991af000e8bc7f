use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use jiff::Timestamp;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{alvys::entity::Entity, error::IngestError, interval::week::TimeWindow};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub start: Timestamp,
    pub end: Timestamp,
}

/// The records of one tenant/entity export, as written to disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportArtifact {
    pub scac: String,
    pub entity: Entity,
    /// Export time as `yyyymmddHHMMSSmmm`, stamped on every loaded row.
    pub file_id: String,
    pub exported_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<WindowBounds>,
    pub records: Vec<Value>,
}

impl ExportArtifact {
    pub fn new(
        scac: &str,
        entity: Entity,
        window: &TimeWindow,
        records: Vec<Value>,
        exported_at: Timestamp,
    ) -> Self {
        ExportArtifact {
            scac: scac.to_string(),
            entity,
            file_id: file_id(exported_at),
            exported_at,
            window: entity.is_windowed().then(|| WindowBounds {
                start: window.start_utc(),
                end: window.end_utc(),
            }),
            records,
        }
    }
}

/// Whether `path` is named like an artifact of `entity`.
fn belongs_to(path: &Path, entity: Entity) -> bool {
    let prefix = entity.as_str().to_uppercase();
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| {
            if entity.is_windowed() {
                name.starts_with(&format!("{}_API_", prefix)) && name.ends_with(".json.gz")
            } else {
                name == format!("{}.json.gz", prefix)
            }
        })
}

pub fn file_id(ts: Timestamp) -> String {
    format!(
        "{}{:03}",
        ts.strftime("%Y%m%d%H%M%S"),
        ts.subsec_millisecond()
    )
}

/// Export files on disk, one directory per SCAC.
#[derive(Clone)]
pub struct AlvysArchive {
    pub base_dir: PathBuf,
}

impl AlvysArchive {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        AlvysArchive {
            base_dir: base_dir.into(),
        }
    }

    pub fn dir(&self, scac: &str) -> PathBuf {
        self.base_dir.join(scac)
    }

    /// Path of the artifact for this tenant, entity and week.  Snapshot
    /// entities don't depend on the week.
    pub fn filename(&self, scac: &str, entity: Entity, window: &TimeWindow) -> PathBuf {
        let name = if entity.is_windowed() {
            format!(
                "{}_API_{}.json.gz",
                entity.as_str().to_uppercase(),
                window.label()
            )
        } else {
            format!("{}.json.gz", entity.as_str().to_uppercase())
        };
        self.dir(scac).join(name)
    }

    /// Write the artifact to a temporary file and rename it into place.
    pub fn write(
        &self,
        artifact: &ExportArtifact,
        window: &TimeWindow,
    ) -> Result<PathBuf, IngestError> {
        let path = self.filename(&artifact.scac, artifact.entity, window);
        let dir = self.dir(&artifact.scac);
        fs::create_dir_all(&dir).map_err(|e| IngestError::artifact(dir.display(), e))?;

        let tmp = path.with_extension("gz.tmp");
        let file = File::create(&tmp).map_err(|e| IngestError::artifact(tmp.display(), e))?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut encoder, artifact)
            .map_err(|e| IngestError::artifact(tmp.display(), e))?;
        encoder
            .finish()
            .and_then(|mut w| std::io::Write::flush(&mut w))
            .map_err(|e| IngestError::artifact(tmp.display(), e))?;
        fs::rename(&tmp, &path).map_err(|e| IngestError::artifact(path.display(), e))?;
        info!(
            "[{}] {}: wrote {} records to {}",
            artifact.scac,
            artifact.entity,
            artifact.records.len(),
            path.display()
        );
        Ok(path)
    }

    pub fn read(&self, path: &Path) -> Result<ExportArtifact, IngestError> {
        let file = File::open(path).map_err(|e| IngestError::artifact(path.display(), e))?;
        let decoder = GzDecoder::new(BufReader::new(file));
        serde_json::from_reader(decoder).map_err(|e| IngestError::artifact(path.display(), e))
    }

    /// All artifacts of an entity for this tenant, sorted by name.
    pub fn artifacts(&self, scac: &str, entity: Entity) -> Result<Vec<PathBuf>, IngestError> {
        let mut out: Vec<PathBuf> = self
            .files(scac)?
            .into_iter()
            .filter(|p| belongs_to(p, entity))
            .collect();
        out.sort();
        Ok(out)
    }

    /// Remove the artifacts of these entities for a tenant, every week of
    /// them, including leftover temp files.  Other entities are untouched.
    /// Returns the number of files removed.
    pub fn clear(&self, scac: &str, entities: &[Entity]) -> Result<usize, IngestError> {
        let mut removed = 0;
        for path in self.files(scac)? {
            let stale = entities.iter().any(|e| {
                belongs_to(&path, *e) || belongs_to(&path.with_extension(""), *e)
            });
            if stale {
                fs::remove_file(&path).map_err(|e| IngestError::artifact(path.display(), e))?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!("[{}] removed {} stale export files", scac, removed);
        }
        Ok(removed)
    }

    fn files(&self, scac: &str) -> Result<Vec<PathBuf>, IngestError> {
        let dir = self.dir(scac);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let entries = fs::read_dir(&dir).map_err(|e| IngestError::artifact(dir.display(), e))?;
        let mut out = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| IngestError::artifact(dir.display(), e))?
                .path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if path.is_file() && (name.ends_with(".json.gz") || name.ends_with(".gz.tmp")) {
                out.push(path);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use serde_json::json;

    use super::*;
    use crate::interval::week::compute_week;

    fn window() -> TimeWindow {
        compute_week("2024-01-17T18:30:00Z".parse().unwrap(), "America/Denver").unwrap()
    }

    #[test]
    fn file_ids() -> Result<(), Box<dyn Error>> {
        assert_eq!(file_id("2024-01-14T07:00:00.123Z".parse()?), "20240114070000123");
        assert_eq!(file_id("2024-01-14T07:00:00Z".parse()?), "20240114070000000");
        Ok(())
    }

    #[test]
    fn filenames() {
        let archive = AlvysArchive::new("/data");
        assert_eq!(
            archive.filename("ABCD", Entity::Loads, &window()),
            PathBuf::from("/data/ABCD/LOADS_API_20240107-20240113.json.gz")
        );
        assert_eq!(
            archive.filename("ABCD", Entity::Drivers, &window()),
            PathBuf::from("/data/ABCD/DRIVERS.json.gz")
        );
    }

    #[test]
    fn write_read_clear() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = AlvysArchive::new(dir.path());
        let window = window();
        let exported_at: Timestamp = "2024-01-18T12:00:00.250Z".parse()?;
        let loads = ExportArtifact::new(
            "ABCD",
            Entity::Loads,
            &window,
            vec![json!({"Id": "L1"}), json!({"Id": "L2"})],
            exported_at,
        );
        let path = archive.write(&loads, &window)?;
        assert!(path.exists());
        assert!(!path.with_extension("gz.tmp").exists());

        let back = archive.read(&path)?;
        assert_eq!(back, loads);
        assert_eq!(back.file_id, "20240118120000250");
        assert_eq!(
            back.window.map(|w| w.start),
            Some("2024-01-07T07:00:00Z".parse()?)
        );

        let drivers = ExportArtifact::new("ABCD", Entity::Drivers, &window, vec![], exported_at);
        assert!(drivers.window.is_none());
        archive.write(&drivers, &window)?;

        assert_eq!(archive.artifacts("ABCD", Entity::Loads)?, vec![path]);
        assert_eq!(archive.artifacts("ABCD", Entity::Drivers)?.len(), 1);
        assert!(archive.artifacts("ABCD", Entity::Trips)?.is_empty());
        assert!(archive.artifacts("WXYZ", Entity::Loads)?.is_empty());

        assert_eq!(archive.clear("ABCD", &Entity::ALL)?, 2);
        assert!(archive.artifacts("ABCD", Entity::Loads)?.is_empty());
        Ok(())
    }

    #[test]
    fn clear_only_touches_the_given_entities() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let archive = AlvysArchive::new(dir.path());
        let week = window();
        let week_before = week.previous()?;
        let exported_at: Timestamp = "2024-01-18T12:00:00Z".parse()?;
        for w in [&week, &week_before] {
            let loads = ExportArtifact::new("ABCD", Entity::Loads, w, vec![], exported_at);
            archive.write(&loads, w)?;
        }
        let drivers = ExportArtifact::new("ABCD", Entity::Drivers, &week, vec![], exported_at);
        archive.write(&drivers, &week)?;
        // an interrupted write of trips
        let tmp = archive
            .filename("ABCD", Entity::Trips, &week)
            .with_extension("gz.tmp");
        fs::write(&tmp, b"partial")?;

        assert_eq!(archive.clear("ABCD", &[Entity::Drivers])?, 1);
        assert_eq!(archive.artifacts("ABCD", Entity::Loads)?.len(), 2);
        assert!(tmp.exists());

        assert_eq!(archive.clear("ABCD", &[Entity::Loads, Entity::Trips])?, 3);
        assert!(archive.artifacts("ABCD", Entity::Loads)?.is_empty());
        assert!(!tmp.exists());
        Ok(())
    }

    #[test]
    fn unreadable_artifact() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("LOADS_API_x.json.gz");
        fs::write(&path, b"not gzip")?;
        let archive = AlvysArchive::new(dir.path());
        assert!(matches!(
            archive.read(&path),
            Err(IngestError::Artifact { .. })
        ));
        Ok(())
    }
}
