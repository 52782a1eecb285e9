// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! File system access used by the engine

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

/// File system operations the engine needs
pub trait FileSystem: Send + Sync {
    /// Read a file as UTF-8
    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Write a file, creating parent directories
    fn write(&self, path: &Path, contents: &str) -> Result<()>;

    /// Last modification time
    fn modified(&self, path: &Path) -> Result<DateTime<Utc>>;

    /// Is the path an existing directory?
    fn is_dir(&self, path: &Path) -> bool;

    /// Names of the entries in a directory, sorted
    fn list_dir(&self, path: &Path) -> Result<Vec<String>>;
}

/// The local disk
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl FileSystem for LocalFs {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|e| EngineError::io(path, e))
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }
        fs::write(path, contents).map_err(|e| EngineError::io(path, e))
    }

    fn modified(&self, path: &Path) -> Result<DateTime<Utc>> {
        let meta = fs::metadata(path).map_err(|e| EngineError::io(path, e))?;
        let time = meta.modified().map_err(|e| EngineError::io(path, e))?;
        Ok(DateTime::<Utc>::from(time))
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path).map_err(|e| EngineError::io(path, e))? {
            let entry = entry.map_err(|e| EngineError::io(path, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

/// Absolute path of a project-relative path
#[must_use]
pub fn absolute(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|p| !p.is_empty())
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}
