//! # Jobs
//!
//! Bulk export and import run as jobs behind [`JobService`]. The engine
//! only defines the seam and the work itself ([`run_job`]); scheduling,
//! threads and retries belong to whoever implements the service.

use crate::export::{
    decode_archive, encode_archive, export_collection, import_archive, retype_archive,
};
use crate::manager::EntityManager;
use crate::{CollectionContext, CorvidError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Opaque reference to a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub Uuid);

impl JobHandle {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// What a job should do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobParameters {
    /// Write an archive of one collection to `path`.
    Export {
        tenant: Uuid,
        collection: String,
        /// Connection names to carry along with the members.
        connections: Vec<String>,
        path: PathBuf,
    },
    /// Read archives from `paths`, in order, into one collection.
    Import {
        tenant: Uuid,
        collection: String,
        paths: Vec<PathBuf>,
        /// Re-type every imported entity, ignoring the archived types.
        #[serde(default)]
        entity_type: Option<String>,
    },
}

impl JobParameters {
    #[must_use]
    pub fn context(&self) -> CollectionContext {
        match self {
            Self::Export {
                tenant, collection, ..
            }
            | Self::Import {
                tenant, collection, ..
            } => CollectionContext::new(*tenant, collection.clone()),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Export { .. } => "export",
            Self::Import { .. } => "import",
        }
    }
}

/// Where a job is in its life.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Scheduled,
    Running,
    Finished { entities: usize, connections: usize },
    Failed { reason: String },
}

impl JobState {
    /// Whether the job will not change state again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Failed { .. })
    }
}

/// Accepts jobs and reports their state.
pub trait JobService: Send + Sync {
    fn schedule(&self, parameters: JobParameters) -> Result<JobHandle, CorvidError>;

    /// Fails with `Validation` for a handle this service never issued.
    fn get_state(&self, handle: &JobHandle) -> Result<JobState, CorvidError>;
}

fn io_error(e: std::io::Error) -> CorvidError {
    CorvidError::IoError(e.to_string())
}

/// Run a job to completion on the calling thread and return its final
/// state.
pub fn run_job(manager: &EntityManager, parameters: &JobParameters) -> JobState {
    match execute(manager, parameters) {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(kind = parameters.kind(), error = %err, "job failed");
            JobState::Failed {
                reason: err.to_string(),
            }
        }
    }
}

fn execute(manager: &EntityManager, parameters: &JobParameters) -> Result<JobState, CorvidError> {
    let context = parameters.context();
    context.validate()?;
    match parameters {
        JobParameters::Export {
            connections, path, ..
        } => {
            let archive = export_collection(manager, &context, connections)?;
            std::fs::write(path, encode_archive(&archive)?).map_err(io_error)?;
            Ok(JobState::Finished {
                entities: archive.entities.len(),
                connections: archive.connections.len(),
            })
        }
        JobParameters::Import {
            paths, entity_type, ..
        } => {
            if paths.is_empty() {
                return Err(CorvidError::Validation(
                    "import needs at least one archive".to_string(),
                ));
            }
            let mut entities = 0;
            let mut connections = 0;
            for path in paths {
                let (e, c) = import_file(manager, &context, path, entity_type.as_deref())
                    .map_err(|err| {
                        CorvidError::IoError(format!("{}: {}", path.display(), err))
                    })?;
                tracing::info!(
                    path = %path.display(),
                    entities = e,
                    connections = c,
                    "archive imported"
                );
                entities += e;
                connections += c;
            }
            Ok(JobState::Finished {
                entities,
                connections,
            })
        }
    }
}

/// Import one archive file. Archives already imported by the same job stay
/// in place when a later one fails.
fn import_file(
    manager: &EntityManager,
    context: &CollectionContext,
    path: &Path,
    entity_type: Option<&str>,
) -> Result<(usize, usize), CorvidError> {
    let bytes = std::fs::read(path).map_err(io_error)?;
    let mut archive = decode_archive(&bytes)?;
    if let Some(entity_type) = entity_type {
        archive = retype_archive(&archive, entity_type)?;
    }
    let summary = import_archive(manager, context, &archive)?;
    Ok((summary.entities, summary.connections))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendKind, CorvidConfig, StorageConfig};
    use crate::{Entity, Id};

    fn manager() -> EntityManager {
        let config = CorvidConfig {
            storage: StorageConfig {
                backend: BackendKind::Memory,
                ..Default::default()
            },
            ..Default::default()
        };
        EntityManager::open(&config).expect("open")
    }

    #[test]
    fn export_then_import_through_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cats.crvx");
        let tenant = Uuid::new_v4();

        let source = manager();
        let ctx = CollectionContext::new(tenant, "cats");
        let saved = source
            .create(&ctx, Entity::new(Id::generate("cat")))
            .expect("create");

        let exported = run_job(
            &source,
            &JobParameters::Export {
                tenant,
                collection: "cats".to_string(),
                connections: Vec::new(),
                path: path.clone(),
            },
        );
        assert_eq!(exported, JobState::Finished { entities: 1, connections: 0 });

        let target = manager();
        let imported = run_job(
            &target,
            &JobParameters::Import {
                tenant,
                collection: "cats".to_string(),
                paths: vec![path],
                entity_type: Some("kitten".to_string()),
            },
        );
        assert_eq!(imported, JobState::Finished { entities: 1, connections: 0 });

        let retyped = Id::new("kitten", saved.id().uuid());
        assert!(target.get(&ctx, &retyped).expect("get").is_some());
        assert!(target.get(&ctx, saved.id()).expect("get").is_none());
    }

    #[test]
    fn missing_file_fails_the_job() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = run_job(
            &manager(),
            &JobParameters::Import {
                tenant: Uuid::new_v4(),
                collection: "cats".to_string(),
                paths: vec![dir.path().join("missing.crvx")],
                entity_type: None,
            },
        );
        assert!(matches!(&state, JobState::Failed { reason } if reason.contains("missing.crvx")));
        assert!(state.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    fn export_one(manager: &EntityManager, tenant: Uuid, collection: &str, path: &Path) {
        let state = run_job(
            manager,
            &JobParameters::Export {
                tenant,
                collection: collection.to_string(),
                connections: Vec::new(),
                path: path.to_path_buf(),
            },
        );
        assert!(matches!(state, JobState::Finished { .. }));
    }

    #[test]
    fn import_several_archives_in_one_job() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tenant = Uuid::new_v4();
        let source = manager();
        let cats = CollectionContext::new(tenant, "cats");
        let dogs = CollectionContext::new(tenant, "dogs");
        source.create(&cats, Entity::new(Id::generate("cat"))).expect("cat");
        source.create(&dogs, Entity::new(Id::generate("dog"))).expect("dog 1");
        source.create(&dogs, Entity::new(Id::generate("dog"))).expect("dog 2");

        let first = dir.path().join("cats.crvx");
        let second = dir.path().join("dogs.crvx");
        export_one(&source, tenant, "cats", &first);
        export_one(&source, tenant, "dogs", &second);

        let target = manager();
        let state = run_job(
            &target,
            &JobParameters::Import {
                tenant,
                collection: "pets".to_string(),
                paths: vec![first, second],
                entity_type: None,
            },
        );
        assert_eq!(state, JobState::Finished { entities: 3, connections: 0 });
        let pets = CollectionContext::new(tenant, "pets");
        let page = target.get_collection(&pets, None, 10).expect("page");
        assert_eq!(page.results.len(), 3);
    }

    #[test]
    fn failing_archive_is_named_and_earlier_ones_stay() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tenant = Uuid::new_v4();
        let source = manager();
        let cats = CollectionContext::new(tenant, "cats");
        source.create(&cats, Entity::new(Id::generate("cat"))).expect("cat");
        let good = dir.path().join("cats.crvx");
        export_one(&source, tenant, "cats", &good);
        let bad = dir.path().join("garbage.crvx");
        std::fs::write(&bad, b"not an archive").expect("write");

        let target = manager();
        let state = run_job(
            &target,
            &JobParameters::Import {
                tenant,
                collection: "cats".to_string(),
                paths: vec![good, bad],
                entity_type: None,
            },
        );
        assert!(matches!(&state, JobState::Failed { reason } if reason.contains("garbage.crvx")));
        let page = target.get_collection(&cats, None, 10).expect("page");
        assert_eq!(page.results.len(), 1);
    }

    #[test]
    fn import_without_archives_is_rejected() {
        let state = run_job(
            &manager(),
            &JobParameters::Import {
                tenant: Uuid::new_v4(),
                collection: "cats".to_string(),
                paths: Vec::new(),
                entity_type: None,
            },
        );
        assert!(matches!(state, JobState::Failed { .. }));
    }
}
