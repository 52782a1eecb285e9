// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Resource filter projection

use crate::types::{Resource, DEFAULT_NAMESPACE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Criteria a resource must meet to be listed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceFilter {
    /// Case-insensitive substring of the name
    pub name: Option<String>,
    /// Exact kind
    pub kind: Option<String>,
    /// Exact namespace; a missing namespace counts as `default`
    pub namespace: Option<String>,
    /// Labels that must all be present
    pub labels: BTreeMap<String, String>,
    /// Annotations that must all be present
    pub annotations: BTreeMap<String, String>,
    /// File or folder the resource must live in
    pub file_or_folder_contained_in: Option<String>,
}

fn toggle(current: Option<String>, requested: Option<String>) -> Option<String> {
    match requested {
        Some(value) if current.as_deref() == Some(value.as_str()) => None,
        Some(value) => Some(value),
        None => current,
    }
}

fn toggle_entries(current: &mut BTreeMap<String, String>, requested: BTreeMap<String, String>) {
    for (key, value) in requested {
        if current.get(&key) == Some(&value) {
            current.remove(&key);
        } else {
            current.insert(key, value);
        }
    }
}

impl ResourceFilter {
    /// Does the filter constrain anything?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Does the resource pass every criterion?
    #[must_use]
    pub fn matches(&self, resource: &Resource) -> bool {
        if let Some(name) = &self.name {
            if !resource.name.to_lowercase().contains(&name.to_lowercase()) {
                return false;
            }
        }
        if self.kind.as_ref().is_some_and(|k| *k != resource.kind) {
            return false;
        }
        if let Some(ns) = &self.namespace {
            if resource.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE) != ns {
                return false;
            }
        }
        if let Some(folder) = &self.file_or_folder_contained_in {
            let inside = resource.file_path == *folder
                || resource
                    .file_path
                    .strip_prefix(folder.as_str())
                    .is_some_and(|rest| rest.starts_with('/'));
            if !inside {
                return false;
            }
        }
        contains_all(&resource.labels_at(&["metadata", "labels"]), &self.labels)
            && contains_all(&resource.labels_at(&["metadata", "annotations"]), &self.annotations)
    }

    /// Merge another filter in
    ///
    /// Kind, namespace and folder given again with their current value are
    /// cleared. Label and annotation entries toggle per key. The name is
    /// kept.
    pub fn extend(&mut self, other: ResourceFilter) {
        self.kind = toggle(self.kind.take(), other.kind);
        self.namespace = toggle(self.namespace.take(), other.namespace);
        self.file_or_folder_contained_in =
            toggle(self.file_or_folder_contained_in.take(), other.file_or_folder_contained_in);
        toggle_entries(&mut self.labels, other.labels);
        toggle_entries(&mut self.annotations, other.annotations);
    }
}

fn contains_all(actual: &BTreeMap<String, String>, wanted: &BTreeMap<String, String>) -> bool {
    wanted.iter().all(|(k, v)| actual.get(k) == Some(v))
}
