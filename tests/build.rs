//! End-to-end builder scenarios against real temporary workspaces.

mod common;

use common::{init_tracing, TempWorkspace};
use gql_build::{
    create_builder_service, CanonicalId, ChangeSet, DiskSnapshotCache, ElementKind,
    SessionBuilder, ServiceConfig, SnapshotCache,
};
use pretty_assertions::assert_eq;
use std::path::PathBuf;

fn fragment_module(imports: &[&str], binding: &str, fragment: &str, on: &str) -> String {
    let mut source = String::from("import { gql } from \"@gql/runtime\";\n");
    for import in imports {
        let local = import.trim_start_matches("./").replace(['/', '-'], "_");
        source.push_str(&format!("import {{ f_{local} }} from \"{import}\";\n"));
    }
    source.push_str(&format!(
        "export const {binding} = gql.fragment(`fragment {fragment} on {on} {{ id }}`);\n"
    ));
    source
}

fn id_of(path: &PathBuf, ast_path: &str) -> CanonicalId {
    CanonicalId::new(path, ast_path).unwrap()
}

#[test]
fn linear_chain_builds_and_reuses_snapshots() {
    init_tracing();
    let ws = TempWorkspace::new();
    let a = ws.write("a.ts", &fragment_module(&["./b"], "f_a", "FA", "A"));
    let b = ws.write("b.ts", &fragment_module(&["./c"], "f_b", "FB", "B"));
    let c = ws.write("c.ts", &fragment_module(&[], "f_c", "FC", "C"));

    let mut session = SessionBuilder::default().entrypoint(&a).build().unwrap();
    let artifact = session.build_initial().unwrap();

    assert_eq!(artifact.len(), 3);
    for (path, ast_path) in [(&a, "f_a"), (&b, "f_b"), (&c, "f_c")] {
        let element = artifact.element(&id_of(path, ast_path)).unwrap();
        assert_eq!(element.kind, ElementKind::Fragment);
    }
    assert_eq!(artifact.report.cache.misses, 3);
    assert_eq!(artifact.report.cache.hits, 0);
    assert_eq!(artifact.report.cache.skips, 0);

    // no-change rebuild: everything comes from the fingerprint fast path
    let rebuilt = session.build_initial().unwrap();
    assert_eq!(rebuilt.report.cache.hits, 3);
    assert_eq!(rebuilt.report.cache.misses, 0);
    assert_eq!(rebuilt.elements, artifact.elements);

    let stats = session.stats();
    assert_eq!(stats.snapshot_count, 3);
    assert_eq!(stats.module_adjacency_size, 3);
}

#[test]
fn cache_counters_partition_visited_files() {
    let ws = TempWorkspace::new();
    let a = ws.write("a.ts", &fragment_module(&["./b"], "f_a", "FA", "A"));
    ws.write("b.ts", &fragment_module(&[], "f_b", "FB", "B"));

    let mut session = SessionBuilder::default().entrypoint(&a).build().unwrap();
    let artifact = session.build_initial().unwrap();
    assert_eq!(artifact.report.cache.total(), session.stats().snapshot_count);

    let artifact = session.build_initial().unwrap();
    assert_eq!(artifact.report.cache.total(), session.stats().snapshot_count);

    ws.write("b.ts", &fragment_module(&[], "f_b", "FBv2", "B"));
    let artifact = session.update(&ChangeSet::updated_files([ws.path_of("b.ts")])).unwrap();
    assert_eq!(artifact.report.cache.total(), session.stats().snapshot_count);
}

#[test]
fn empty_change_set_returns_the_previous_artifact() {
    let ws = TempWorkspace::new();
    let a = ws.write("a.ts", &fragment_module(&[], "f_a", "FA", "A"));

    let mut session = SessionBuilder::default().entrypoint(&a).build().unwrap();
    let first = session.build_initial().unwrap();
    let second = session.update(&ChangeSet::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn diamond_graphs_build_each_module_once() {
    let ws = TempWorkspace::new();
    let a = ws.write(
        "a.ts",
        "import { gql } from \"@gql/runtime\";\n\
         import { f_b } from \"./b\";\n\
         import { f_c } from \"./c\";\n\
         export const f_a = gql.fragment(`fragment FA on A { id }`);\n",
    );
    ws.write("b.ts", &fragment_module(&["./d"], "f_b", "FB", "B"));
    ws.write("c.ts", &fragment_module(&["./d"], "f_c", "FC", "C"));
    let d = ws.write("d.ts", &fragment_module(&[], "f_d", "FD", "D"));

    let mut session = SessionBuilder::default().entrypoint(&a).build().unwrap();
    let artifact = session.build_initial().unwrap();
    assert_eq!(artifact.len(), 4);
    assert_eq!(artifact.report.cache.misses, 4);
    assert!(artifact.element(&id_of(&d, "f_d")).is_some());
}

#[test]
fn circular_graphql_modules_fail_the_build() {
    let ws = TempWorkspace::new();
    let a = ws.write("a.ts", &fragment_module(&["./b"], "f_a", "FA", "A"));
    ws.write("b.ts", &fragment_module(&["./a"], "f_b", "FB", "B"));

    let mut session = SessionBuilder::default().entrypoint(&a).build().unwrap();
    let err = session.build_initial().unwrap_err();
    assert_eq!(err.code(), "CIRCULAR_DEPENDENCY");
    assert!(session.last_artifact().is_none());
}

#[test]
fn cycles_through_plain_service_modules_are_relaxed() {
    let ws = TempWorkspace::new();
    let a = ws.write(
        "a.ts",
        "import { gql } from \"@gql/runtime\";\n\
         import { UserService } from \"./service\";\n\
         export const f_a = gql.fragment(`fragment FA on A { id }`);\n",
    );
    ws.write(
        "service.ts",
        "import { f_a } from \"./a\";\n\
         export class UserService {\n\
           describe() {\n\
             return f_a;\n\
           }\n\
         }\n",
    );

    let mut session = SessionBuilder::default().entrypoint(&a).build().unwrap();
    let artifact = session.build_initial().unwrap();
    assert_eq!(artifact.len(), 1);
    assert!(artifact.element(&id_of(&a, "f_a")).is_some());
}

#[test]
fn touching_a_middle_file_replaces_only_its_element() {
    init_tracing();
    let ws = TempWorkspace::new();
    let a = ws.write("a.ts", &fragment_module(&["./b"], "f_a", "FA", "A"));
    let b = ws.write("b.ts", &fragment_module(&["./c"], "f_b", "FB", "B"));
    let c = ws.write("c.ts", &fragment_module(&[], "f_c", "FC", "C"));

    let mut session = SessionBuilder::default().entrypoint(&a).build().unwrap();
    let first = session.build_initial().unwrap();

    ws.write("b.ts", &fragment_module(&["./c"], "f_b", "FBChanged", "B"));
    let second = session.update(&ChangeSet::updated_files([b.clone()])).unwrap();

    // b was purged (miss), its importer a was bypassed (skip), c was reused
    assert!(second.report.cache.skips >= 1, "skips: {:?}", second.report.cache);
    assert!(second.report.cache.hits >= 1, "hits: {:?}", second.report.cache);
    assert!(second.report.cache.misses >= 1, "misses: {:?}", second.report.cache);

    let b_id = id_of(&b, "f_b");
    assert_ne!(second.element(&b_id), first.element(&b_id));
    for (path, ast_path) in [(&a, "f_a"), (&c, "f_c")] {
        let id = id_of(path, ast_path);
        assert_eq!(second.element(&id), first.element(&id));
    }
}

#[test]
fn missing_imports_abort_and_keep_the_last_artifact() {
    let ws = TempWorkspace::new();
    let a = ws.write("a.ts", &fragment_module(&["./b"], "f_a", "FA", "A"));
    let b = ws.write("b.ts", &fragment_module(&[], "f_b", "FB", "B"));

    let mut session = SessionBuilder::default().entrypoint(&a).build().unwrap();
    let first = session.build_initial().unwrap();

    ws.write("b.ts", &fragment_module(&["./missing"], "f_b", "FB", "B"));
    let err = session.update(&ChangeSet::updated_files([b.clone()])).unwrap_err();
    assert_eq!(err.code(), "MISSING_IMPORT");
    match err {
        gql_build::BuildError::MissingImport { importing_file, specifier } => {
            assert_eq!(importing_file, b);
            assert_eq!(specifier, "./missing");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.last_artifact(), Some(&first));
}

#[test]
fn removed_files_vanish_from_every_session_surface() {
    let ws = TempWorkspace::new();
    let a = ws.write("a.ts", &fragment_module(&["./b"], "f_a", "FA", "A"));
    let b = ws.write("b.ts", &fragment_module(&[], "f_b", "FB", "B"));

    let mut session = SessionBuilder::default().entrypoint(&a).build().unwrap();
    let first = session.build_initial().unwrap();
    assert_eq!(first.len(), 2);

    ws.write("a.ts", &fragment_module(&[], "f_a", "FA", "A"));
    ws.remove("b.ts");
    let second = session
        .update(&ChangeSet {
            updated: vec![a.clone()],
            removed: vec![b.clone()],
            ..Default::default()
        })
        .unwrap();

    assert_eq!(second.len(), 1);
    let b_prefix = format!("{}::", b.display());
    assert!(second.elements.keys().all(|id| !id.as_str().starts_with(&b_prefix)));
    assert_eq!(session.stats().snapshot_count, 1);
    assert_eq!(session.stats().module_adjacency_size, 1);
    assert!(session.cache().peek(&b).is_none());
}

#[test]
fn entrypoints_must_exist() {
    let ws = TempWorkspace::new();
    let mut session =
        SessionBuilder::default().entrypoint(ws.path_of("ghost.ts")).build().unwrap();
    let err = session.build_initial().unwrap_err();
    assert_eq!(err.code(), "ENTRY_NOT_FOUND");
}

#[test]
fn js_imports_resolve_to_empty_modules() {
    let ws = TempWorkspace::new();
    let a = ws.write(
        "a.ts",
        "import { gql } from \"@gql/runtime\";\n\
         import { legacy } from \"./legacy\";\n\
         export const f_a = gql.fragment(`fragment FA on A { id }`);\n",
    );
    ws.write("legacy.js", "module.exports = { legacy: true };\n");

    let mut session = SessionBuilder::default().entrypoint(&a).build().unwrap();
    let artifact = session.build_initial().unwrap();
    assert_eq!(artifact.len(), 1);
    assert_eq!(session.stats().snapshot_count, 2);
}

#[test]
fn type_only_imports_do_not_need_targets() {
    let ws = TempWorkspace::new();
    let a = ws.write(
        "a.ts",
        "import { gql } from \"@gql/runtime\";\n\
         import type { Ghost } from \"./ghost-types\";\n\
         export const f_a = gql.fragment(`fragment FA on A { id }`);\n",
    );

    let mut session = SessionBuilder::default().entrypoint(&a).build().unwrap();
    let artifact = session.build_initial().unwrap();
    assert_eq!(artifact.len(), 1);
}

#[test]
fn snapshots_store_forward_slash_paths() {
    let ws = TempWorkspace::new();
    let a = ws.write("nested/dir/a.ts", &fragment_module(&[], "f_a", "FA", "A"));

    let mut session = SessionBuilder::default().entrypoint(&a).build().unwrap();
    session.build_initial().unwrap();
    for snapshot in session.cache().entries() {
        assert!(!snapshot.normalized_file_path.contains('\\'));
    }
}

#[test]
fn operations_models_and_slices_aggregate_with_their_variants() {
    let ws = TempWorkspace::new();
    let a = ws.write(
        "a.ts",
        "import { gql } from \"@gql/runtime\";\n\
         export const q_user = gql.query(`query User($id: ID!) { user(id: $id) { id } }`);\n\
         export const models = {\n\
           user: gql.model({ typename: \"User\" }),\n\
         };\n\
         export const s_user = gql.slice({ pick: () => [$.user.id] });\n",
    );

    let mut session = SessionBuilder::default().entrypoint(&a).build().unwrap();
    let artifact = session.build_initial().unwrap();
    assert_eq!(artifact.len(), 3);
    assert_eq!(artifact.element(&id_of(&a, "q_user")).unwrap().kind, ElementKind::Operation);
    assert_eq!(artifact.element(&id_of(&a, "models.user")).unwrap().kind, ElementKind::Model);
    assert_eq!(artifact.element(&id_of(&a, "s_user")).unwrap().kind, ElementKind::Slice);

    let gql_build::Prebuild::Operation(operation) =
        &artifact.element(&id_of(&a, "q_user")).unwrap().prebuild
    else {
        panic!("expected an operation prebuild");
    };
    assert_eq!(operation.name.as_deref(), Some("User"));
    assert_eq!(operation.variable_names, vec!["id"]);
}

#[test]
fn warnings_surface_in_the_report() {
    let ws = TempWorkspace::new();
    let a = ws.write(
        "a.ts",
        "import { gql as g } from \"@gql/runtime\";\n\
         export const f_a = g.fragment(`fragment FA on A { id }`);\n",
    );

    let mut session = SessionBuilder::default().entrypoint(&a).build().unwrap();
    let artifact = session.build_initial().unwrap();
    assert_eq!(artifact.report.warnings.len(), 1);
    assert!(artifact.report.warnings[0].contains("renamed"));
}

#[test]
fn disk_cache_survives_across_sessions() {
    let ws = TempWorkspace::new();
    let cache_dir = tempfile::tempdir().unwrap();
    let a = ws.write("a.ts", &fragment_module(&["./b"], "f_a", "FA", "A"));
    ws.write("b.ts", &fragment_module(&[], "f_b", "FB", "B"));

    let make_session = || {
        SessionBuilder::default()
            .cache(DiskSnapshotCache::new(cache_dir.path(), "swc-ts-1", "trampoline-1"))
            .entrypoint(&a)
            .build()
            .unwrap()
    };

    let mut first_session = make_session();
    let first = first_session.build_initial().unwrap();
    assert_eq!(first.report.cache.misses, 2);

    let mut second_session = make_session();
    let second = second_session.build_initial().unwrap();
    assert_eq!(second.report.cache.hits, 2);
    assert_eq!(second.report.cache.misses, 0);
    assert_eq!(second.elements, first.elements);
}

#[test]
fn builder_service_builds_and_updates() {
    let ws = TempWorkspace::new();
    let a = ws.write("a.ts", &fragment_module(&["./b"], "f_a", "FA", "A"));
    let b = ws.write("b.ts", &fragment_module(&[], "f_b", "FB", "B"));

    let mut service = create_builder_service(ServiceConfig {
        entrypoints: vec![a.clone()],
        cache_dir: None,
        analyzer: Default::default(),
    })
    .unwrap();

    let artifact = service.build().unwrap();
    assert_eq!(artifact.len(), 2);

    ws.write("b.ts", &fragment_module(&[], "f_b", "FBv2", "B"));
    let updated = service.update(&ChangeSet::updated_files([b.clone()])).unwrap();
    let b_id = id_of(&b, "f_b");
    assert_ne!(updated.element(&b_id), artifact.element(&b_id));
}

#[cfg(feature = "async")]
#[tokio::test]
async fn async_builds_match_sync_builds() {
    let ws = TempWorkspace::new();
    let a = ws.write("a.ts", &fragment_module(&["./b"], "f_a", "FA", "A"));
    ws.write("b.ts", &fragment_module(&[], "f_b", "FB", "B"));

    let mut sync_session = SessionBuilder::default().entrypoint(&a).build().unwrap();
    let sync_artifact = sync_session.build_initial().unwrap();

    let mut async_session = SessionBuilder::default().entrypoint(&a).build().unwrap();
    let async_artifact = async_session.build_initial_async().await.unwrap();
    assert_eq!(async_artifact.elements, sync_artifact.elements);
}
