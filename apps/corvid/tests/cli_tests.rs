//! Integration tests for the Corvid command line.
//!
//! Commands run against a redb file in a temp directory, so state written by
//! one invocation is visible to the next.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use clap::Parser;
use corvid::cli::{BackendArg, Cli, Commands, execute};
use corvid_core::{
    BackendKind, CollectionContext, CorvidConfig, CorvidError, EntityManager, Id, Results,
    StorageConfig, Value,
};
use std::path::Path;
use uuid::Uuid;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Parse a command line against the redb file at `db`.
fn cli(db: &Path, args: &[&str]) -> Cli {
    let db = db.to_str().unwrap();
    let mut argv = vec!["corvid", "-B", "redb", "-D", db];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

/// Open the store directly, after the CLI has released it.
fn open(db: &Path) -> EntityManager {
    let config = CorvidConfig {
        storage: StorageConfig {
            backend: BackendKind::Redb,
            path: db.to_path_buf(),
        },
        ..Default::default()
    };
    EntityManager::open(&config).unwrap()
}

fn members(manager: &EntityManager, ctx: &CollectionContext) -> Vec<Id> {
    match manager.get_collection(ctx, None, 100).unwrap().results {
        Results::Entities(entities) => entities.into_iter().map(|e| e.id().clone()).collect(),
        Results::Ids(ids) => ids,
    }
}

// =============================================================================
// ARGUMENT PARSING
// =============================================================================

#[test]
fn global_flags_parse_after_subcommand() {
    let tenant = Uuid::new_v4().to_string();
    let cli = Cli::try_parse_from([
        "corvid", "put", "-t", "cat", "-p", "{}", "--tenant", tenant.as_str(), "-c", "cats", "-B",
        "memory",
    ])
    .unwrap();
    assert_eq!(cli.collection, "cats");
    assert_eq!(cli.backend, Some(BackendArg::Memory));
    assert!(matches!(cli.command, Some(Commands::Put { .. })));
}

#[test]
fn unknown_backend_rejected() {
    assert!(Cli::try_parse_from(["corvid", "-B", "tape", "status"]).is_err());
}

#[test]
fn connection_search_needs_both_flags() {
    assert!(Cli::try_parse_from(["corvid", "search", "--source", "cat/x"]).is_err());
    assert!(
        Cli::try_parse_from(["corvid", "search", "--source", "cat/x", "--connection", "likes"])
            .is_ok()
    );
}

#[test]
fn props_and_file_conflict() {
    assert!(
        Cli::try_parse_from(["corvid", "put", "-t", "cat", "-p", "{}", "-f", "props.json"])
            .is_err()
    );
}

#[test]
fn import_takes_several_inputs() {
    let cli = Cli::try_parse_from(["corvid", "import", "-i", "a.crvx", "b.crvx", "-i", "c.crvx"])
        .unwrap();
    let Some(Commands::Import { inputs, .. }) = cli.command else {
        panic!("expected import");
    };
    let names: Vec<_> = inputs.iter().map(|p| p.to_str().unwrap()).collect();
    assert_eq!(names, vec!["a.crvx", "b.crvx", "c.crvx"]);
    assert!(Cli::try_parse_from(["corvid", "import"]).is_err());
}

#[test]
fn context_requires_tenant() {
    let cli = Cli::try_parse_from(["corvid", "list"]).unwrap();
    assert!(matches!(cli.context(), Err(CorvidError::Validation(_))));
}

// =============================================================================
// EXECUTION
// =============================================================================

#[tokio::test]
async fn status_runs_without_tenant() {
    let cli = Cli::try_parse_from(["corvid", "-B", "memory", "status"]).unwrap();
    execute(cli).await.unwrap();
}

#[tokio::test]
async fn put_without_tenant_fails() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("corvid.db");
    let result = execute(cli(&db, &["put", "-t", "cat"])).await;
    assert!(matches!(result, Err(CorvidError::Validation(_))));
}

#[tokio::test]
async fn put_then_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("corvid.db");
    let tenant = Uuid::new_v4();
    let uuid = Uuid::new_v4();
    let t = tenant.to_string();
    let u = uuid.to_string();

    execute(cli(
        &db,
        &[
            "--tenant", &t, "-c", "cats", "put", "-t", "cat", "--id", &u, "-p",
            r#"{"name": "tom", "lives": 9}"#,
        ],
    ))
    .await
    .unwrap();
    execute(cli(&db, &["--tenant", &t, "-c", "cats", "list"]))
        .await
        .unwrap();
    execute(cli(&db, &["--tenant", &t, "-c", "cats", "search", "-q", "tom"]))
        .await
        .unwrap();

    let id = Id::new("cat", uuid);
    execute(cli(&db, &["--tenant", &t, "-c", "cats", "get", &id.to_key()]))
        .await
        .unwrap();

    let manager = open(&db);
    let ctx = CollectionContext::new(tenant, "cats");
    let snapshot = manager.get(&ctx, &id).unwrap().unwrap();
    let entity = snapshot.entity().unwrap();
    assert_eq!(entity.get("name"), Some(&Value::text("tom")));
    assert_eq!(entity.get("lives"), Some(&Value::Int(9)));
    assert_eq!(members(&manager, &ctx), vec![id]);
}

#[tokio::test]
async fn float_properties_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("corvid.db");
    let t = Uuid::new_v4().to_string();
    let result = execute(cli(
        &db,
        &["--tenant", &t, "put", "-t", "cat", "-p", r#"{"weight": 4.5}"#],
    ))
    .await;
    assert!(matches!(result, Err(CorvidError::Validation(_))));
}

#[tokio::test]
async fn delete_removes_member_keeps_history() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("corvid.db");
    let tenant = Uuid::new_v4();
    let t = tenant.to_string();
    let id = Id::generate("cat");
    let u = id.uuid().to_string();
    let key = id.to_key();

    execute(cli(&db, &["--tenant", &t, "put", "-t", "cat", "--id", &u]))
        .await
        .unwrap();
    execute(cli(&db, &["--tenant", &t, "delete", &key]))
        .await
        .unwrap();
    execute(cli(&db, &["--tenant", &t, "history", &key]))
        .await
        .unwrap();

    let manager = open(&db);
    let ctx = CollectionContext::new(tenant, "default");
    assert!(manager.get(&ctx, &id).unwrap().is_none());
    assert!(members(&manager, &ctx).is_empty());
    assert_eq!(manager.history(&ctx, &id).unwrap().len(), 2);
}

#[tokio::test]
async fn connect_and_list_connections() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("corvid.db");
    let tenant = Uuid::new_v4();
    let t = tenant.to_string();
    let owner = Id::generate("person");
    let pet = Id::generate("cat");
    let owner_uuid = owner.uuid().to_string();
    let pet_uuid = pet.uuid().to_string();

    execute(cli(&db, &["--tenant", &t, "put", "-t", "person", "--id", &owner_uuid]))
        .await
        .unwrap();
    execute(cli(
        &db,
        &["--tenant", &t, "put", "-t", "cat", "--id", &pet_uuid, "-p", r#"{"name": "tom"}"#],
    ))
    .await
    .unwrap();
    execute(cli(
        &db,
        &["--tenant", &t, "connect", &owner.to_key(), "owns", &pet.to_key()],
    ))
    .await
    .unwrap();
    execute(cli(
        &db,
        &["--tenant", &t, "connections", &owner.to_key(), "owns", "-t", "cat"],
    ))
    .await
    .unwrap();

    let manager = open(&db);
    let ctx = CollectionContext::new(tenant, "default");
    assert_eq!(
        manager.connection_targets(&ctx, &owner, "owns").unwrap(),
        vec![pet]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn export_then_import_into_another_collection() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("corvid.db");
    let archive = dir.path().join("cats.crvx");
    let archive_arg = archive.to_str().unwrap();
    let tenant = Uuid::new_v4();
    let t = tenant.to_string();

    for name in ["tom", "felix"] {
        let props = format!(r#"{{"name": "{}"}}"#, name);
        execute(cli(&db, &["--tenant", &t, "-c", "cats", "put", "-t", "cat", "-p", &props]))
            .await
            .unwrap();
    }
    execute(cli(&db, &["--tenant", &t, "-c", "cats", "export", "-o", archive_arg]))
        .await
        .unwrap();
    assert!(archive.is_file());

    execute(cli(&db, &["--tenant", &t, "-c", "copy", "import", "-i", archive_arg]))
        .await
        .unwrap();

    let manager = open(&db);
    let mut original = members(&manager, &CollectionContext::new(tenant, "cats"));
    let mut copied = members(&manager, &CollectionContext::new(tenant, "copy"));
    original.sort();
    copied.sort();
    assert_eq!(original.len(), 2);
    assert_eq!(original, copied);
}

#[tokio::test(flavor = "multi_thread")]
async fn import_of_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("corvid.db");
    let missing = dir.path().join("missing.crvx");
    let t = Uuid::new_v4().to_string();
    let result = execute(cli(
        &db,
        &["--tenant", &t, "import", "-i", missing.to_str().unwrap()],
    ))
    .await;
    assert!(matches!(result, Err(CorvidError::IoError(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn import_several_archives_in_one_command() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("corvid.db");
    let cats = dir.path().join("cats.crvx");
    let dogs = dir.path().join("dogs.crvx");
    let tenant = Uuid::new_v4();
    let t = tenant.to_string();

    execute(cli(&db, &["--tenant", &t, "-c", "cats", "put", "-t", "cat"]))
        .await
        .unwrap();
    execute(cli(&db, &["--tenant", &t, "-c", "dogs", "put", "-t", "dog"]))
        .await
        .unwrap();
    for (collection, archive) in [("cats", &cats), ("dogs", &dogs)] {
        execute(cli(
            &db,
            &["--tenant", &t, "-c", collection, "export", "-o", archive.to_str().unwrap()],
        ))
        .await
        .unwrap();
    }

    execute(cli(
        &db,
        &[
            "--tenant",
            &t,
            "-c",
            "pets",
            "import",
            "-i",
            cats.to_str().unwrap(),
            dogs.to_str().unwrap(),
        ],
    ))
    .await
    .unwrap();

    let manager = open(&db);
    let pets = members(&manager, &CollectionContext::new(tenant, "pets"));
    assert_eq!(pets.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn import_names_the_failing_archive() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("corvid.db");
    let bad = dir.path().join("garbage.crvx");
    std::fs::write(&bad, b"not an archive").unwrap();
    let t = Uuid::new_v4().to_string();

    let result = execute(cli(&db, &["--tenant", &t, "import", "-i", bad.to_str().unwrap()])).await;
    match result {
        Err(CorvidError::IoError(message)) => assert!(message.contains("garbage.crvx")),
        other => panic!("expected an io error, got {:?}", other),
    }
}
