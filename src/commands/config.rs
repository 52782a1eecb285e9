// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Config command - shows the effective configuration

use crate::config::{default_path, Config};
use anyhow::{anyhow, Result};
use std::path::Path;

/// Print the whole configuration, one dotted key, or the default file location
pub fn run(config: &Config, explicit: Option<&Path>, key: Option<&str>, show_path: bool) -> Result<()> {
    if show_path {
        match explicit.map(Path::to_path_buf).or_else(default_path) {
            Some(path) => println!("{}", path.display()),
            None => println!("(no configuration directory on this platform)"),
        }
        return Ok(());
    }

    let Some(key) = key else {
        print!("{}", config.to_toml()?);
        return Ok(());
    };

    let value = toml::Value::try_from(config)?;
    let found = key
        .split('.')
        .try_fold(&value, |v, part| v.get(part))
        .ok_or_else(|| anyhow!("Unknown configuration key: {key}"))?;
    match found {
        toml::Value::String(s) => println!("{s}"),
        toml::Value::Table(_) => print!("{}", toml::to_string_pretty(found)?),
        other => println!("{other}"),
    }
    Ok(())
}
