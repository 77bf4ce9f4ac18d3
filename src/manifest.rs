//! Cached per-table row counts.
//!
//! Counting every table of a research dataset takes minutes, so the counts
//! are collected once and written to a YAML file in the working directory.
//! Later sessions load that file verbatim. There is no staleness check: a
//! file on disk is trusted until someone deletes it or asks for a rebuild.

use crate::client::{ClientError, QueryService};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Default manifest location, relative to the working directory.
pub const DEFAULT_MANIFEST_FILE: &str = ".mimic_info.yaml";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write manifest {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to serialize manifest: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("while counting {database}.{table}: {source}")]
    Count {
        database: String,
        table: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to report progress: {0}")]
    Progress(#[source] std::io::Error),

    #[error("while listing tables of {database}: {source}")]
    List {
        database: String,
        #[source]
        source: ClientError,
    },
}

/// database → table → row count.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(BTreeMap<String, BTreeMap<String, u64>>);

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, database: impl Into<String>, tables: BTreeMap<String, u64>) {
        self.0.insert(database.into(), tables);
    }

    pub fn row_count(&self, database: &str, table: &str) -> Option<u64> {
        self.0.get(database)?.get(table).copied()
    }

    pub fn databases(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn tables(&self, database: &str) -> Option<&BTreeMap<String, u64>> {
        self.0.get(database)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of tables across all databases.
    pub fn table_count(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let yaml = serde_yaml::to_string(self).map_err(ManifestError::Serialize)?;
        std::fs::write(path, yaml).map_err(|source| ManifestError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Enumerate every table of every database and count its rows.
    ///
    /// Databases are visited in sorted order, tables in listing order, one
    /// count query each. The first failing call aborts the whole build.
    /// One line per database is written to `progress`.
    pub fn build(
        service: &dyn QueryService,
        base_project: &str,
        databases: &[String],
        progress: &mut dyn Write,
    ) -> Result<Self, ManifestError> {
        let mut sorted = databases.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut manifest = Self::new();
        for db in &sorted {
            writeln!(progress, "processing database {db}").map_err(ManifestError::Progress)?;
            let qualified = qualify(base_project, db);
            let tables = service
                .list_tables(&qualified)
                .map_err(|source| ManifestError::List {
                    database: qualified.clone(),
                    source,
                })?;
            let mut counts = BTreeMap::new();
            for table in tables {
                let n = service
                    .count_rows(&qualified, &table)
                    .map_err(|source| ManifestError::Count {
                        database: qualified.clone(),
                        table: table.clone(),
                        source,
                    })?;
                info!(database = %db, %table, rows = n, "counted table");
                counts.insert(table, n);
            }
            manifest.insert(db.clone(), counts);
        }
        Ok(manifest)
    }
}

/// Join the base project prefix and a database name.
///
/// The prefix may be given with or without its trailing dot
/// (`physionet-data.` and `physionet-data` are equivalent). An empty prefix
/// leaves the name untouched.
pub fn qualify(base_project: &str, database: &str) -> String {
    let base = base_project.trim().trim_end_matches('.');
    if base.is_empty() {
        database.to_string()
    } else {
        format!("{base}.{database}")
    }
}

/// Load the manifest at `path`, building and persisting it first when the
/// file does not exist.
///
/// The build blocks until every table has been counted and reports its
/// progress to `progress`. A failed build writes no manifest file.
pub fn ensure_manifest(
    service: &dyn QueryService,
    base_project: &str,
    databases: &[String],
    path: &Path,
    progress: &mut dyn Write,
) -> Result<Manifest, ManifestError> {
    if path.exists() {
        info!(path = %path.display(), "loading cached manifest");
        return Manifest::load(path);
    }

    writeln!(progress, "This will take a bit of time...").map_err(ManifestError::Progress)?;
    let manifest = Manifest::build(service, base_project, databases, progress)?;
    manifest.save(path)?;
    writeln!(progress, "Completed").map_err(ManifestError::Progress)?;
    info!(
        path = %path.display(),
        tables = manifest.table_count(),
        "wrote manifest"
    );
    Ok(manifest)
}
