// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Invariant tests for the resource graph engine
//!
//! These tests drive the engine through its command set and check:
//! 1. Reference consistency as files come and go
//! 2. Overlay exclusivity and generation discard
//! 3. Atomicity of failing commands

use chrono::{DateTime, Utc};
use kubeyard::cluster::ClusterClient;
use kubeyard::config::Config;
use kubeyard::engine::{Command, Engine, ExternalWork};
use kubeyard::error::{EngineError, Result};
use kubeyard::filter::ResourceFilter;
use kubeyard::fs::{FileSystem, LocalFs};
use kubeyard::history::{Direction, SelectionEntry};
use kubeyard::kinds::{KindHandler, KindRegistry};
use kubeyard::overlay::PreviewState;
use kubeyard::types::{
    is_transient_path, DiagnosticLevel, PreviewKind, RefStatus, Resource, ROOT_FILE_ENTRY, PREVIEW_PREFIX,
};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

fn make_deployment(name: &str, config_map: &str) -> String {
    format!(
        "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {name}\nspec:\n  template:\n    spec:\n      containers:\n        - name: app\n          image: nginx\n          envFrom:\n            - configMapRef:\n                name: {config_map}\n"
    )
}

fn make_config_map(name: &str) -> String {
    format!("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\ndata:\n  key: value\n")
}

fn make_project(files: &[(&str, &str)]) -> TempDir {
    let temp = TempDir::new().unwrap();
    for (path, content) in files {
        write(&temp, path, content);
    }
    temp
}

fn write(temp: &TempDir, path: &str, content: &str) {
    let full = temp.path().join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, content).unwrap();
}

fn open(temp: &TempDir) -> Engine {
    open_with(temp, Box::new(LocalFs))
}

fn open_with(temp: &TempDir, fs: Box<dyn FileSystem>) -> Engine {
    let (engine, _) = Engine::open(temp.path(), &Config::default(), fs).unwrap();
    engine
}

fn by_kind<'a>(engine: &'a Engine, kind: &str) -> &'a Resource {
    engine
        .all_resources()
        .find(|r| r.kind == kind)
        .unwrap_or_else(|| panic!("no {kind} loaded"))
}

fn by_name<'a>(engine: &'a Engine, name: &str) -> &'a Resource {
    engine
        .all_resources()
        .find(|r| r.name == name)
        .unwrap_or_else(|| panic!("no {name} loaded"))
}

fn config_map_refs(resource: &Resource) -> Vec<(RefStatus, Option<String>)> {
    resource
        .outgoing_refs()
        .filter(|r| r.target_kind == "ConfigMap")
        .map(|r| (r.status, r.target_id.clone()))
        .collect()
}

/// Every resource is owned by a known file or carries a transient prefix, and no edge dangles
fn assert_consistent(engine: &Engine) {
    for resource in engine.all_resources() {
        assert!(
            is_transient_path(&resource.file_path) || engine.file_tree().contains_key(&resource.file_path),
            "{} points at missing file {}",
            resource.id,
            resource.file_path
        );
        for r in &resource.refs {
            if let Some(target) = &r.target_id {
                assert!(engine.resource(target).is_some(), "{} has a dangling edge to {target}", resource.id);
            }
        }
    }
}

/// Cluster client returning a fixed listing
struct FakeCluster {
    listing: String,
    fail_deletes: bool,
}

impl ClusterClient for FakeCluster {
    fn list_resources(&self, _context: &str, _registry: &KindRegistry) -> Result<String> {
        Ok(self.listing.clone())
    }

    fn delete_resource(&self, context: &str, _resource: &Resource, _handler: &dyn KindHandler) -> Result<()> {
        if self.fail_deletes {
            Err(EngineError::Cluster(format!("{context} refused the delete")))
        } else {
            Ok(())
        }
    }
}

/// Local disk whose writes can be switched off
struct FlakyFs {
    fail_writes: Arc<AtomicBool>,
}

impl FileSystem for FlakyFs {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        LocalFs.read_to_string(path)
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EngineError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            ));
        }
        LocalFs.write(path, contents)
    }

    fn modified(&self, path: &Path) -> Result<DateTime<Utc>> {
        LocalFs.modified(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        LocalFs.is_dir(path)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        LocalFs.list_dir(path)
    }
}

// =============================================================================
// Reference Resolution Scenarios
// =============================================================================

#[test]
fn test_config_map_reference_becomes_satisfied() {
    let temp = make_project(&[]);
    let mut engine = open(&temp);

    write(&temp, "a.yaml", &make_deployment("web", "cfg"));
    engine.dispatch(Command::AddPaths(vec!["a.yaml".into()])).unwrap();

    let dep = by_kind(&engine, "Deployment");
    assert_eq!(config_map_refs(dep), vec![(RefStatus::UnsatisfiedRequired, None)]);
    assert_eq!(engine.validation_issues().len(), 1);

    write(&temp, "b.yaml", &make_config_map("cfg"));
    engine.dispatch(Command::AddPaths(vec!["b.yaml".into()])).unwrap();

    let cm_id = by_kind(&engine, "ConfigMap").id.clone();
    let dep = by_kind(&engine, "Deployment");
    assert_eq!(config_map_refs(dep), vec![(RefStatus::Satisfied, Some(cm_id.clone()))]);
    assert!(engine.validation_issues().is_empty());
    assert_eq!(engine.resource(&cm_id).unwrap().incoming_refs().count(), 1);
    assert_consistent(&engine);
}

#[test]
fn test_remove_path_leaves_no_dangling_edges() {
    let temp = make_project(&[("a.yaml", &make_deployment("web", "cfg")), ("b.yaml", &make_config_map("cfg"))]);
    let mut engine = open(&temp);
    let dep_id = by_kind(&engine, "Deployment").id.clone();

    fs::remove_file(temp.path().join("a.yaml")).unwrap();
    engine.dispatch(Command::PathsRemoved(vec!["a.yaml".into()])).unwrap();

    assert!(engine.resource(&dep_id).is_none());
    assert!(!engine.file_tree().contains_key("a.yaml"));
    let pointing_at_dep = engine
        .all_resources()
        .flat_map(|r| r.refs.iter())
        .filter(|r| r.target_id.as_deref() == Some(dep_id.as_str()))
        .count();
    assert_eq!(pointing_at_dep, 0);
    assert_eq!(by_kind(&engine, "ConfigMap").incoming_refs().count(), 0);
    assert_consistent(&engine);
}

#[test]
fn test_removing_target_marks_reference_unsatisfied() {
    let temp = make_project(&[("a.yaml", &make_deployment("web", "cfg")), ("b.yaml", &make_config_map("cfg"))]);
    let mut engine = open(&temp);

    fs::remove_file(temp.path().join("b.yaml")).unwrap();
    engine.dispatch(Command::PathsRemoved(vec!["b.yaml".into()])).unwrap();

    let dep = by_kind(&engine, "Deployment");
    assert_eq!(config_map_refs(dep), vec![(RefStatus::UnsatisfiedRequired, None)]);
    assert_consistent(&engine);
}

#[test]
fn test_reload_with_same_content_is_idempotent() {
    let temp = make_project(&[("a.yaml", &make_deployment("web", "cfg")), ("b.yaml", &make_config_map("cfg"))]);
    let mut engine = open(&temp);

    write(&temp, "b.yaml", &format!("{}  other: value\n", make_config_map("cfg")));
    engine.dispatch(Command::FilesChanged(vec!["b.yaml".into()])).unwrap();
    let first: Vec<Resource> = engine.all_resources().cloned().collect();

    engine.dispatch(Command::FilesChanged(vec!["b.yaml".into()])).unwrap();
    let second: Vec<Resource> = engine.all_resources().cloned().collect();

    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

#[test]
fn test_optional_references_follow_option() {
    let dep = format!("{}            - secretRef:\n                name: creds\n                optional: true\n", make_deployment("web", "cfg"));
    let temp = make_project(&[("a.yaml", &dep), ("b.yaml", &make_config_map("cfg"))]);
    let mut engine = open(&temp);

    let secret_refs = |engine: &Engine| {
        by_kind(engine, "Deployment")
            .outgoing_refs()
            .filter(|r| r.target_kind == "Secret")
            .map(|r| r.status)
            .collect::<Vec<_>>()
    };
    assert!(secret_refs(&engine).is_empty());

    engine.dispatch(Command::SetIgnoreOptionalUnsatisfiedRefs(false)).unwrap();
    assert_eq!(secret_refs(&engine), vec![RefStatus::UnsatisfiedOptional]);
    assert!(engine.validation_issues().is_empty());

    engine.dispatch(Command::SetIgnoreOptionalUnsatisfiedRefs(true)).unwrap();
    assert!(secret_refs(&engine).is_empty());
}

// =============================================================================
// Overlay Tests
// =============================================================================

#[test]
fn test_stale_cluster_preview_is_discarded() {
    let temp = make_project(&[("b.yaml", &make_config_map("cfg"))]);
    let mut engine = open(&temp).with_cluster_client(Arc::new(FakeCluster {
        listing: make_config_map("live"),
        fail_deletes: false,
    }));

    let outcome = engine
        .dispatch(Command::StartPreview {
            kind: PreviewKind::Cluster,
            target: "dev".into(),
        })
        .unwrap();
    let request = outcome.request.unwrap();
    assert!(matches!(request.work, ExternalWork::FetchCluster { .. }));

    engine.dispatch(Command::StopPreview).unwrap();
    engine
        .dispatch(Command::PreviewLoaded {
            generation: request.generation,
            result: Ok(make_config_map("live")),
        })
        .unwrap();

    assert_eq!(engine.preview(), &PreviewState::Inactive);
    assert_eq!(engine.all_resources().filter(|r| r.is_preview()).count(), 0);
    assert_eq!(engine.all_resources().count(), 1);
}

#[test]
fn test_only_one_preview_at_a_time() {
    let temp = make_project(&[
        ("base/kustomization.yaml", "apiVersion: kustomize.config.k8s.io/v1beta1\nkind: Kustomization\nresources:\n  - cm.yaml\n"),
        ("base/cm.yaml", &make_config_map("cfg")),
        ("chart/Chart.yaml", "apiVersion: v2\nname: demo\nversion: 0.1.0\n"),
        ("chart/values.yaml", "replicas: 1\n"),
    ]);
    let mut engine = open(&temp);
    let kustomization = by_kind(&engine, "Kustomization").id.clone();

    let first = engine
        .dispatch(Command::StartPreview {
            kind: PreviewKind::Kustomization,
            target: kustomization.clone(),
        })
        .unwrap()
        .request
        .unwrap();
    engine
        .dispatch(Command::PreviewLoaded {
            generation: first.generation,
            result: Ok(make_config_map("rendered")),
        })
        .unwrap();
    assert!(matches!(engine.preview(), PreviewState::Active(_)));
    assert_eq!(engine.active_resources().count(), 1);
    assert_eq!(engine.selection().resource_id.as_deref(), Some(kustomization.as_str()));
    assert_eq!(engine.history().len(), 1);

    let second = engine
        .dispatch(Command::StartPreview {
            kind: PreviewKind::Helm,
            target: "chart/values.yaml".into(),
        })
        .unwrap()
        .request
        .unwrap();
    assert_eq!(engine.all_resources().filter(|r| r.is_preview()).count(), 0);

    engine
        .dispatch(Command::PreviewLoaded {
            generation: second.generation,
            result: Ok(format!("{}---\n{}", make_config_map("one"), make_config_map("two"))),
        })
        .unwrap();
    let preview_paths: Vec<&str> = engine
        .all_resources()
        .filter(|r| r.is_preview())
        .map(|r| r.file_path.as_str())
        .collect();
    assert_eq!(preview_paths.len(), 2);
    assert!(preview_paths
        .iter()
        .all(|p| *p == format!("{PREVIEW_PREFIX}chart/values.yaml")));

    // The superseded kustomization result must not come back
    engine
        .dispatch(Command::PreviewLoaded {
            generation: first.generation,
            result: Ok(make_config_map("late")),
        })
        .unwrap();
    assert_eq!(engine.all_resources().filter(|r| r.is_preview()).count(), 2);

    engine.dispatch(Command::StopPreview).unwrap();
    assert_eq!(engine.all_resources().filter(|r| r.is_preview()).count(), 0);
    assert_eq!(engine.active_resources().count(), 2);
}

#[test]
fn test_cluster_diff_matches_local_and_cluster() {
    let temp = make_project(&[("a.yaml", &make_config_map("shared")), ("b.yaml", &make_config_map("local-only"))]);
    let listing = format!("{}---\n{}", make_config_map("shared"), make_config_map("remote-only"));
    let mut engine = open(&temp).with_cluster_client(Arc::new(FakeCluster {
        listing: listing.clone(),
        fail_deletes: false,
    }));

    let request = engine
        .dispatch(Command::LoadClusterDiff { context: "dev".into() })
        .unwrap()
        .request
        .unwrap();
    engine
        .dispatch(Command::ClusterDiffLoaded {
            generation: request.generation,
            context: "dev".into(),
            result: Ok(listing),
        })
        .unwrap();

    let names: Vec<(&str, bool, bool)> = engine
        .cluster_diff_matches()
        .iter()
        .map(|m| (m.name.as_str(), m.is_local_only(), m.is_cluster_only()))
        .collect();
    assert_eq!(names.len(), 2, "cluster-only records are hidden by default");
    assert!(names.contains(&("shared", false, false)));
    assert!(names.contains(&("local-only", true, false)));

    engine.dispatch(Command::ToggleClusterOnlyResources).unwrap();
    assert_eq!(engine.cluster_diff_matches().len(), 3);

    engine.dispatch(Command::SelectAllClusterDiffMatches).unwrap();
    assert_eq!(engine.cluster_diff().selected.len(), 3);
    engine.dispatch(Command::UnselectAllClusterDiffMatches).unwrap();
    assert!(engine.cluster_diff().selected.is_empty());

    // Local edits refresh the match records
    fs::remove_file(temp.path().join("a.yaml")).unwrap();
    engine.dispatch(Command::PathsRemoved(vec!["a.yaml".into()])).unwrap();
    let shared = engine
        .cluster_diff_matches()
        .into_iter()
        .find(|m| m.name == "shared")
        .cloned()
        .unwrap();
    assert!(shared.is_cluster_only());

    engine.dispatch(Command::CloseClusterDiff).unwrap();
    assert_eq!(engine.all_resources().filter(|r| r.is_cluster_diff()).count(), 0);
}

#[test]
fn test_failed_cluster_delete_leaves_map_unchanged() {
    let temp = make_project(&[]);
    let mut engine = open(&temp).with_cluster_client(Arc::new(FakeCluster {
        listing: make_config_map("live"),
        fail_deletes: true,
    }));
    let request = engine
        .dispatch(Command::StartPreview {
            kind: PreviewKind::Cluster,
            target: "dev".into(),
        })
        .unwrap()
        .request
        .unwrap();
    engine
        .dispatch(Command::PreviewLoaded {
            generation: request.generation,
            result: Ok(make_config_map("live")),
        })
        .unwrap();
    let id = by_kind(&engine, "ConfigMap").id.clone();

    let err = engine.dispatch(Command::RemoveResource { id: id.clone() }).unwrap_err();

    assert!(matches!(err, EngineError::Cluster(_)));
    assert!(engine.resource(&id).is_some());
}

// =============================================================================
// Editing Tests
// =============================================================================

#[test]
fn test_rename_updates_references() {
    let temp = make_project(&[("a.yaml", &make_deployment("web", "cfg")), ("b.yaml", &make_config_map("cfg"))]);
    let mut engine = open(&temp);
    let cm_id = by_kind(&engine, "ConfigMap").id.clone();

    engine
        .dispatch(Command::RenameResource {
            id: cm_id.clone(),
            new_name: "settings".into(),
            update_refs: true,
        })
        .unwrap();

    assert_eq!(engine.resource(&cm_id).unwrap().name, "settings");
    let deployment_file = fs::read_to_string(temp.path().join("a.yaml")).unwrap();
    assert!(deployment_file.contains("name: settings"));
    assert!(!deployment_file.contains("name: cfg"));
    assert_eq!(
        config_map_refs(by_kind(&engine, "Deployment")),
        vec![(RefStatus::Satisfied, Some(cm_id))]
    );
}

#[test]
fn test_unsaved_resource_round_trip() {
    let temp = make_project(&[("a.yaml", &make_deployment("web", "cfg"))]);
    let mut engine = open(&temp);

    let unsaved = engine
        .dispatch(Command::AddResource {
            text: make_config_map("cfg"),
        })
        .unwrap()
        .created
        .unwrap();
    assert!(engine.resource(&unsaved).unwrap().is_unsaved());
    assert_eq!(
        config_map_refs(by_kind(&engine, "Deployment")),
        vec![(RefStatus::Satisfied, Some(unsaved.clone()))]
    );

    let saved = engine
        .dispatch(Command::SaveUnsavedResource {
            id: unsaved.clone(),
            path: "config/cfg.yaml".into(),
        })
        .unwrap()
        .created
        .unwrap();

    assert!(engine.resource(&unsaved).is_none());
    assert_eq!(engine.resource(&saved).unwrap().file_path, "config/cfg.yaml");
    assert!(engine.file_tree().contains_key("config"));
    assert!(temp.path().join("config/cfg.yaml").exists());
    assert_eq!(
        config_map_refs(by_kind(&engine, "Deployment")),
        vec![(RefStatus::Satisfied, Some(saved))]
    );
    assert_consistent(&engine);
}

#[test]
fn test_save_into_ignored_file_keeps_existing_documents() {
    let temp = make_project(&[
        (".gitignore", "build/\n"),
        ("build/out.yaml", &make_config_map("precious")),
        ("a.yaml", &make_deployment("web", "cfg")),
    ]);
    let mut engine = open(&temp);
    assert!(engine.all_resources().all(|r| r.name != "precious"));

    let unsaved = engine
        .dispatch(Command::AddResource {
            text: make_config_map("new"),
        })
        .unwrap()
        .created
        .unwrap();
    let saved = engine
        .dispatch(Command::SaveUnsavedResource {
            id: unsaved,
            path: "build/out.yaml".into(),
        })
        .unwrap()
        .created
        .unwrap();

    let on_disk = fs::read_to_string(temp.path().join("build/out.yaml")).unwrap();
    assert!(on_disk.contains("name: precious"));
    assert!(on_disk.contains("name: new"));
    assert_eq!(engine.resource(&saved).unwrap().name, "new");
    assert_eq!(engine.resource(&saved).unwrap().file_path, "build/out.yaml");
    assert_consistent(&engine);
}

#[test]
fn test_remove_after_multibyte_disk_change_is_rejected() {
    let text = format!("{}---\n{}", make_config_map("first"), make_config_map("second"));
    let temp = make_project(&[("both.yaml", &text)]);
    let mut engine = open(&temp);
    let second = by_name(&engine, "second").clone();
    let start = second.range.unwrap().start;

    // Changed on disk with no watch event yet; `start` now falls inside a char
    let prefix = if start % 2 == 0 { "#" } else { "" };
    let changed = format!("{prefix}{}\n{text}", "é".repeat(start));
    write(&temp, "both.yaml", &changed);

    let err = engine
        .dispatch(Command::RemoveResource { id: second.id.clone() })
        .unwrap_err();

    assert!(matches!(err, EngineError::InvalidEdit(_)));
    assert!(engine.resource(&second.id).is_some());
    assert_eq!(fs::read_to_string(temp.path().join("both.yaml")).unwrap(), changed);
}

#[test]
fn test_edit_shifts_following_documents() {
    let text = format!("{}---\n{}", make_config_map("first"), make_config_map("second"));
    let temp = make_project(&[("both.yaml", &text)]);
    let mut engine = open(&temp);
    let find = |engine: &Engine, name: &str| {
        engine
            .all_resources()
            .find(|r| r.name == name)
            .unwrap()
            .clone()
    };
    let first = find(&engine, "first");
    let before = find(&engine, "second").range.unwrap();

    let longer = format!("{}  extra: a-much-longer-value\n", make_config_map("first"));
    engine
        .dispatch(Command::UpdateResource {
            id: first.id.clone(),
            text: longer,
        })
        .unwrap();

    let second = find(&engine, "second");
    let after = second.range.unwrap();
    assert!(after.start > before.start);
    let disk = fs::read_to_string(temp.path().join("both.yaml")).unwrap();
    assert!(disk[after.start..after.end()].contains("name: second"));
    assert!(disk.contains("a-much-longer-value"));
}

#[test]
fn test_multi_document_edit_is_rejected() {
    let temp = make_project(&[("b.yaml", &make_config_map("cfg"))]);
    let mut engine = open(&temp);
    let id = by_kind(&engine, "ConfigMap").id.clone();

    let err = engine
        .dispatch(Command::UpdateResource {
            id: id.clone(),
            text: format!("{}---\n{}", make_config_map("a"), make_config_map("b")),
        })
        .unwrap_err();

    assert!(matches!(err, EngineError::InvalidEdit(_)));
    assert_eq!(engine.resource(&id).unwrap().name, "cfg");
}

#[test]
fn test_failed_disk_write_reverts_state() {
    let temp = make_project(&[("a.yaml", &make_deployment("web", "cfg")), ("b.yaml", &make_config_map("cfg"))]);
    let fail_writes = Arc::new(AtomicBool::new(false));
    let mut engine = open_with(
        &temp,
        Box::new(FlakyFs {
            fail_writes: Arc::clone(&fail_writes),
        }),
    );
    let cm = by_kind(&engine, "ConfigMap").clone();
    let before: Vec<Resource> = engine.all_resources().cloned().collect();

    fail_writes.store(true, Ordering::SeqCst);
    let err = engine
        .dispatch(Command::UpdateResource {
            id: cm.id.clone(),
            text: make_config_map("renamed"),
        })
        .unwrap_err();

    assert!(matches!(err, EngineError::Io { .. }));
    let after: Vec<Resource> = engine.all_resources().cloned().collect();
    assert_eq!(before, after);
    assert_eq!(fs::read_to_string(temp.path().join("b.yaml")).unwrap(), make_config_map("cfg"));
}

// =============================================================================
// Batch Tests
// =============================================================================

#[test]
fn test_batch_add_sees_earlier_paths() {
    let temp = make_project(&[("README.md", "# manifests\n")]);
    let mut engine = open(&temp);
    write(&temp, "a.yaml", &make_deployment("web", "cfg"));
    write(&temp, "b.yaml", &make_config_map("cfg"));

    let outcome = engine
        .dispatch(Command::AddPaths(vec!["a.yaml".into(), "b.yaml".into()]))
        .unwrap();

    assert!(outcome.diagnostics.iter().all(|d| d.level != DiagnosticLevel::Error));
    let cm = by_kind(&engine, "ConfigMap").id.clone();
    assert_eq!(
        config_map_refs(by_kind(&engine, "Deployment")),
        vec![(RefStatus::Satisfied, Some(cm))]
    );
    assert!(engine.validation_issues().is_empty());
    assert_consistent(&engine);
}

#[test]
fn test_failing_path_in_batch_keeps_siblings() {
    let temp = make_project(&[
        ("a.yaml", &make_config_map("one")),
        ("bad.yaml", &make_config_map("kept")),
        ("c.yaml", &make_config_map("three")),
    ]);
    let mut engine = open(&temp);

    write(&temp, "a.yaml", &make_config_map("uno"));
    fs::write(temp.path().join("bad.yaml"), [0xff, 0xfe, 0x00]).unwrap();
    write(&temp, "c.yaml", &make_config_map("tres"));

    let outcome = engine
        .dispatch(Command::FilesChanged(vec!["a.yaml".into(), "bad.yaml".into(), "c.yaml".into()]))
        .unwrap();

    let errors: Vec<_> = outcome
        .diagnostics
        .iter()
        .filter(|d| d.level == DiagnosticLevel::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].file_path.as_deref(), Some("bad.yaml"));

    let mut names: Vec<&str> = engine.local_resources().map(|r| r.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["kept", "tres", "uno"]);
    assert_eq!(by_name(&engine, "kept").file_path, "bad.yaml");
    assert_consistent(&engine);
}

#[test]
fn test_update_many_during_preview_resolves_local_edits() {
    let temp = make_project(&[
        ("dep.yaml", &make_deployment("web", "cfg")),
        ("cfg.yaml", &make_config_map("cfg")),
        ("other.yaml", &make_config_map("other")),
        ("base/kustomization.yaml", "apiVersion: kustomize.config.k8s.io/v1beta1\nkind: Kustomization\nresources: []\n"),
    ]);
    let mut engine = open(&temp);
    let dep = by_kind(&engine, "Deployment").id.clone();
    let cfg = by_name(&engine, "cfg").id.clone();
    let other = by_name(&engine, "other").id.clone();
    let kustomization = by_kind(&engine, "Kustomization").id.clone();

    let request = engine
        .dispatch(Command::StartPreview {
            kind: PreviewKind::Kustomization,
            target: kustomization,
        })
        .unwrap()
        .request
        .unwrap();
    engine
        .dispatch(Command::PreviewLoaded {
            generation: request.generation,
            result: Ok(make_config_map("rendered")),
        })
        .unwrap();
    let rendered = by_name(&engine, "rendered").id.clone();

    engine
        .dispatch(Command::UpdateManyResources(vec![
            (dep.clone(), make_deployment("web", "other")),
            (rendered.clone(), make_config_map("rendered-again")),
        ]))
        .unwrap();

    assert_eq!(
        config_map_refs(engine.resource(&dep).unwrap()),
        vec![(RefStatus::Satisfied, Some(other.clone()))]
    );
    assert!(engine.resource(&cfg).unwrap().incoming_refs().next().is_none());
    assert_eq!(engine.resource(&rendered).unwrap().name, "rendered-again");
    assert!(fs::read_to_string(temp.path().join("dep.yaml")).unwrap().contains("name: other"));

    engine.dispatch(Command::StopPreview).unwrap();
    assert_eq!(
        config_map_refs(engine.resource(&dep).unwrap()),
        vec![(RefStatus::Satisfied, Some(other))]
    );
    assert_consistent(&engine);
}

// =============================================================================
// Selection and Filter Tests
// =============================================================================

#[test]
fn test_new_selection_truncates_forward_history() {
    let temp = make_project(&[
        ("a.yaml", &make_config_map("a")),
        ("b.yaml", &make_config_map("b")),
        ("c.yaml", &make_config_map("c")),
    ]);
    let mut engine = open(&temp);
    for path in ["a.yaml", "b.yaml", "c.yaml"] {
        engine
            .dispatch(Command::SelectFile {
                path: path.into(),
                virtual_selection: false,
            })
            .unwrap();
    }

    engine.dispatch(Command::NavigateHistory(Direction::Back)).unwrap();
    assert_eq!(engine.selection().path.as_deref(), Some("b.yaml"));

    engine
        .dispatch(Command::SelectFile {
            path: ROOT_FILE_ENTRY.into(),
            virtual_selection: false,
        })
        .unwrap();
    let entries: Vec<SelectionEntry> = engine.history().entries().cloned().collect();
    assert_eq!(
        entries,
        vec![
            SelectionEntry::Path("a.yaml".into()),
            SelectionEntry::Path("b.yaml".into()),
            SelectionEntry::Path(ROOT_FILE_ENTRY.into()),
        ]
    );
    assert!(!engine.history().can_go_forward());
}

#[test]
fn test_selecting_resource_highlights_targets() {
    let temp = make_project(&[("a.yaml", &make_deployment("web", "cfg")), ("b.yaml", &make_config_map("cfg"))]);
    let mut engine = open(&temp);
    let dep_id = by_kind(&engine, "Deployment").id.clone();
    let cm_id = by_kind(&engine, "ConfigMap").id.clone();

    engine
        .dispatch(Command::SelectResource {
            id: dep_id,
            virtual_selection: false,
        })
        .unwrap();

    assert!(engine.selection().highlighted.contains(&cm_id));
    assert!(engine
        .dispatch(Command::SelectResource {
            id: "res:missing".into(),
            virtual_selection: false,
        })
        .is_err());
    assert_eq!(engine.history().len(), 1);
}

#[test]
fn test_filter_toggles_on_repeat() {
    let temp = make_project(&[("a.yaml", &make_deployment("web", "cfg")), ("b.yaml", &make_config_map("cfg"))]);
    let mut engine = open(&temp);
    let only_config_maps = ResourceFilter {
        kind: Some("ConfigMap".into()),
        ..ResourceFilter::default()
    };

    engine.dispatch(Command::ExtendResourceFilter(only_config_maps.clone())).unwrap();
    let kinds: Vec<&str> = engine.filtered_resources().iter().map(|r| r.kind.as_str()).collect();
    assert_eq!(kinds, vec!["ConfigMap"]);

    engine.dispatch(Command::ExtendResourceFilter(only_config_maps)).unwrap();
    assert_eq!(engine.filtered_resources().len(), 2);

    engine
        .dispatch(Command::SetResourceFilter(ResourceFilter {
            name: Some("WE".into()),
            ..ResourceFilter::default()
        }))
        .unwrap();
    assert_eq!(engine.filtered_resources().len(), 1);
    engine.dispatch(Command::ResetResourceFilter).unwrap();
    assert!(engine.filter().is_empty());
}
