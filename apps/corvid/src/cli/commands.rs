//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use super::PageArgs;
use crate::jobs::TokioJobService;
use corvid_core::{
    CollectionContext, CorvidConfig, CorvidError, Entity, EntityManager, Id, JobParameters,
    JobService, JobState, MvccEntity, PipelineResults, Results, Value, Version, archive_hash,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Handle;

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for a properties document (10 MB).
const MAX_PROPERTIES_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum file size for import (500 MB).
///
/// Import files can be larger since they contain a whole collection.
const MAX_IMPORT_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// How often a waiting command polls its job.
const JOB_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), CorvidError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| CorvidError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(CorvidError::Validation(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path: it must exist and be a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, CorvidError> {
    let canonical = path.canonicalize().map_err(|e| {
        CorvidError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(CorvidError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path: its parent must be an existing directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, CorvidError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        CorvidError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(CorvidError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| CorvidError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// SESSION
// =============================================================================

/// An opened store plus the output settings of one invocation.
#[derive(Debug, Clone)]
pub struct Session {
    manager: EntityManager,
    json_mode: bool,
    page_size: usize,
}

impl Session {
    pub fn open(config: &CorvidConfig, json_mode: bool) -> Result<Self, CorvidError> {
        Ok(Self {
            manager: EntityManager::open(config)?,
            json_mode,
            page_size: config.pipeline.page_size,
        })
    }

    #[must_use]
    pub fn manager(&self) -> &EntityManager {
        &self.manager
    }

    fn limit(&self, page: &PageArgs) -> usize {
        page.limit.unwrap_or(self.page_size)
    }
}

// =============================================================================
// JSON CONVERSION
// =============================================================================

/// Parse an id given as `type/uuid`.
pub fn parse_id(text: &str) -> Result<Id, CorvidError> {
    let id = Id::from_key(text).map_err(|_| {
        CorvidError::Validation(format!("Invalid id '{}', expected type/uuid", text))
    })?;
    id.validate()?;
    Ok(id)
}

/// Convert a JSON value into a property value.
///
/// Floating point numbers and nested objects have no property form.
pub fn value_from_json(json: &serde_json::Value) -> Result<Value, CorvidError> {
    match json {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => n.as_i64().map(Value::Int).ok_or_else(|| {
            CorvidError::Validation(format!("Number {} is not a 64-bit integer", n))
        }),
        serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
        serde_json::Value::Array(items) => items
            .iter()
            .map(value_from_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        serde_json::Value::Object(_) => Err(CorvidError::Validation(
            "Nested objects are not supported as property values".to_string(),
        )),
    }
}

/// Convert a property value into JSON.
#[must_use]
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::from(*n),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
    }
}

/// Parse a JSON object into a property map.
pub fn properties_from_json(text: &str) -> Result<BTreeMap<String, Value>, CorvidError> {
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| CorvidError::Validation(format!("Invalid properties JSON: {}", e)))?;
    let serde_json::Value::Object(object) = json else {
        return Err(CorvidError::Validation(
            "Properties must be a JSON object".to_string(),
        ));
    };
    let mut properties = BTreeMap::new();
    for (name, value) in &object {
        properties.insert(name.clone(), value_from_json(value)?);
    }
    Ok(properties)
}

fn entity_json(snapshot: &MvccEntity) -> serde_json::Value {
    let properties = snapshot.entity().map(|entity| {
        entity
            .properties
            .iter()
            .map(|(name, value)| (name.clone(), value_to_json(value)))
            .collect::<serde_json::Map<_, _>>()
    });
    serde_json::json!({
        "id": snapshot.id().to_key(),
        "version": snapshot.version().0,
        "stage": snapshot.stage().name(),
        "properties": properties,
    })
}

fn print_json(output: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(output).unwrap_or_default()
    );
}

fn print_entity(snapshot: &MvccEntity) {
    let properties = snapshot
        .entity()
        .map(|entity| {
            entity
                .properties
                .iter()
                .map(|(name, value)| format!("{}={}", name, value_to_json(value)))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    println!(
        "{:<50} v{:<20} {:<9} {}",
        snapshot.id().to_key(),
        snapshot.version(),
        snapshot.stage(),
        properties
    );
}

fn print_page(session: &Session, page: &PipelineResults) {
    if session.json_mode {
        let results: Vec<serde_json::Value> = match &page.results {
            Results::Entities(entities) => entities.iter().map(entity_json).collect(),
            Results::Ids(ids) => ids
                .iter()
                .map(|id| serde_json::Value::String(id.to_key()))
                .collect(),
        };
        print_json(&serde_json::json!({
            "results": results,
            "cursor": page.cursor,
            "has_more": page.has_more,
        }));
        return;
    }

    match &page.results {
        Results::Entities(entities) => {
            for snapshot in entities {
                print_entity(snapshot);
            }
        }
        Results::Ids(ids) => {
            for id in ids {
                println!("{}", id.to_key());
            }
        }
    }
    if let Some(cursor) = &page.cursor {
        println!();
        println!("More results: --cursor {}", cursor);
    }
}

// =============================================================================
// WRITE COMMANDS
// =============================================================================

/// Create or update an entity.
pub fn cmd_put(
    session: &Session,
    ctx: &CollectionContext,
    entity_type: &str,
    id: Option<uuid::Uuid>,
    props: Option<&str>,
    file: Option<&Path>,
) -> Result<(), CorvidError> {
    let properties = match (props, file) {
        (Some(text), _) => properties_from_json(text)?,
        (None, Some(path)) => {
            let validated_path = validate_file_path(path)?;
            validate_file_size(&validated_path, MAX_PROPERTIES_FILE_SIZE)?;
            let text = std::fs::read_to_string(&validated_path)
                .map_err(|e| CorvidError::IoError(format!("Read file: {}", e)))?;
            properties_from_json(&text)?
        }
        (None, None) => BTreeMap::new(),
    };

    let id = match id {
        Some(uuid) => Id::new(entity_type, uuid),
        None => Id::generate(entity_type),
    };
    let mut entity = Entity::new(id);
    entity.properties = properties;

    let saved = session.manager.create(ctx, entity)?;
    if session.json_mode {
        print_json(&entity_json(&saved));
    } else {
        println!("Saved {} at version {}", saved.id().to_key(), saved.version());
    }
    Ok(())
}

/// Tombstone an entity.
pub fn cmd_delete(session: &Session, ctx: &CollectionContext, id: &str) -> Result<(), CorvidError> {
    let id = parse_id(id)?;
    let tombstone = session.manager.delete(ctx, &id)?;
    if session.json_mode {
        print_json(&entity_json(&tombstone));
    } else {
        println!("Deleted {} at version {}", id.to_key(), tombstone.version());
    }
    Ok(())
}

/// Connect two entities.
pub fn cmd_connect(
    session: &Session,
    ctx: &CollectionContext,
    source: &str,
    connection: &str,
    target: &str,
) -> Result<(), CorvidError> {
    let source = parse_id(source)?;
    let target = parse_id(target)?;
    let added = session.manager.connect(ctx, &source, connection, &target)?;
    if session.json_mode {
        print_json(&serde_json::json!({
            "source": source.to_key(),
            "connection": connection,
            "target": target.to_key(),
            "added": added,
        }));
    } else if added {
        println!("Connected {} -{}-> {}", source.to_key(), connection, target.to_key());
    } else {
        println!("Already connected; index refreshed");
    }
    Ok(())
}

// =============================================================================
// READ COMMANDS
// =============================================================================

/// Read one entity.
pub fn cmd_get(
    session: &Session,
    ctx: &CollectionContext,
    id: &str,
    version: Option<u64>,
) -> Result<(), CorvidError> {
    let id = parse_id(id)?;
    let snapshot = match version {
        Some(version) => session.manager.get_version(ctx, &id, Version(version))?,
        None => session.manager.get(ctx, &id)?,
    };

    match (&snapshot, session.json_mode) {
        (Some(snapshot), true) => print_json(&entity_json(snapshot)),
        (Some(snapshot), false) => print_entity(snapshot),
        (None, true) => print_json(&serde_json::Value::Null),
        (None, false) => println!("Not found: {}", id.to_key()),
    }
    Ok(())
}

/// Page through the collection.
pub fn cmd_list(
    session: &Session,
    ctx: &CollectionContext,
    page: &PageArgs,
) -> Result<(), CorvidError> {
    let results =
        session
            .manager
            .get_collection(ctx, page.cursor.as_deref(), session.limit(page))?;
    print_page(session, &results);
    Ok(())
}

/// Page through an entity's connections.
pub fn cmd_connections(
    session: &Session,
    ctx: &CollectionContext,
    source: &str,
    connection: &str,
    entity_type: Option<&str>,
    page: &PageArgs,
) -> Result<(), CorvidError> {
    let source = parse_id(source)?;
    let results = session.manager.get_connections(
        ctx,
        &source,
        connection,
        entity_type,
        page.cursor.as_deref(),
        session.limit(page),
    )?;
    print_page(session, &results);
    Ok(())
}

/// Where a search looks.
#[derive(Debug, Clone, Copy)]
pub enum SearchTarget<'a> {
    Collection,
    Connections { source: &'a str, connection: &'a str },
}

/// Search the collection or an entity's connections.
pub fn cmd_search(
    session: &Session,
    ctx: &CollectionContext,
    query: &str,
    entity_type: Option<&str>,
    target: SearchTarget<'_>,
    page: &PageArgs,
) -> Result<(), CorvidError> {
    let limit = session.limit(page);
    let results = match target {
        SearchTarget::Collection => session.manager.search_collection(
            ctx,
            query,
            entity_type,
            page.cursor.as_deref(),
            limit,
        )?,
        SearchTarget::Connections { source, connection } => {
            let source = parse_id(source)?;
            session.manager.search_connections(
                ctx,
                &source,
                connection,
                query,
                entity_type,
                page.cursor.as_deref(),
                limit,
            )?
        }
    };
    print_page(session, &results);
    Ok(())
}

/// List every logged version of an entity.
pub fn cmd_history(session: &Session, ctx: &CollectionContext, id: &str) -> Result<(), CorvidError> {
    let id = parse_id(id)?;
    let history = session.manager.history(ctx, &id)?;

    if session.json_mode {
        let entries: Vec<serde_json::Value> = history
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "version": entry.version().0,
                    "stage": entry.stage().name(),
                })
            })
            .collect();
        print_json(&serde_json::json!({
            "id": id.to_key(),
            "history": entries,
        }));
        return Ok(());
    }

    println!("History of {}", id.to_key());
    for entry in &history {
        println!("  v{:<20} {}", entry.version(), entry.stage());
    }
    if history.is_empty() {
        println!("  (no versions)");
    }
    Ok(())
}

// =============================================================================
// EXPORT / IMPORT COMMANDS
// =============================================================================

async fn run_to_end(session: &Session, parameters: JobParameters) -> Result<JobState, CorvidError> {
    let service = TokioJobService::new(session.manager.clone(), Handle::current());
    let handle = service.schedule(parameters)?;
    tracing::debug!(job = %handle, "waiting for job");
    match service.wait(&handle, JOB_POLL_INTERVAL).await? {
        JobState::Failed { reason } => Err(CorvidError::IoError(format!(
            "Job {} failed: {}",
            handle, reason
        ))),
        state => Ok(state),
    }
}

fn print_job_summary(session: &Session, verb: &str, state: &JobState, hash: Option<&str>) {
    let JobState::Finished {
        entities,
        connections,
    } = state
    else {
        return;
    };
    if session.json_mode {
        print_json(&serde_json::json!({
            "entities": entities,
            "connections": connections,
            "hash": hash,
        }));
        return;
    }
    println!("{} {} entities, {} connections", verb, entities, connections);
    if let Some(hash) = hash {
        println!("Hash: {}", hash);
    }
}

/// Export the collection to an archive file.
pub async fn cmd_export(
    session: &Session,
    ctx: &CollectionContext,
    output: &Path,
    connections: &[String],
) -> Result<(), CorvidError> {
    let validated_output = validate_output_path(output)?;

    let state = run_to_end(
        session,
        JobParameters::Export {
            tenant: ctx.tenant(),
            collection: ctx.collection().to_string(),
            connections: connections.to_vec(),
            path: validated_output.clone(),
        },
    )
    .await?;

    let data = std::fs::read(&validated_output)
        .map_err(|e| CorvidError::IoError(format!("Read file: {}", e)))?;
    let hash = archive_hash(&data);
    print_job_summary(session, "Exported", &state, Some(&hash));
    Ok(())
}

/// Import archive files into the collection, in order, as one job.
pub async fn cmd_import(
    session: &Session,
    ctx: &CollectionContext,
    inputs: &[PathBuf],
    entity_type: Option<&str>,
) -> Result<(), CorvidError> {
    if inputs.is_empty() {
        return Err(CorvidError::Validation("No input files".to_string()));
    }
    let mut paths = Vec::with_capacity(inputs.len());
    for input in inputs {
        let validated_path = validate_file_path(input)?;
        validate_file_size(&validated_path, MAX_IMPORT_FILE_SIZE)?;
        paths.push(validated_path);
    }

    let state = run_to_end(
        session,
        JobParameters::Import {
            tenant: ctx.tenant(),
            collection: ctx.collection().to_string(),
            paths,
            entity_type: entity_type.map(str::to_string),
        },
    )
    .await?;
    print_job_summary(session, "Imported", &state, None);
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show row counts per table.
pub fn cmd_status(session: &Session, config: &CorvidConfig) -> Result<(), CorvidError> {
    let status = session.manager.status()?;

    if session.json_mode {
        print_json(&serde_json::json!({
            "database": config.storage.path.to_string_lossy(),
            "backend": config.storage.backend,
            "page_size": config.pipeline.page_size,
            "drop_policy": config.pipeline.drop_policy,
            "rows": status.rows,
        }));
        return Ok(());
    }

    println!("Corvid Store Status");
    println!("===================");
    println!("Database: {:?}", config.storage.path);
    println!("Backend:  {:?}", config.storage.backend);
    println!();
    for (table, rows) in &status.rows {
        println!("{:<12} {}", format!("{}:", table), rows);
    }

    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
