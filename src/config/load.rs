use super::defaults::REQUIRED_SECTIONS;
use super::{
    AudioSettings, ConfigError, GeneralSettings, NotificationSettings, Settings, ZettaSettings,
};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use toml::{Table, Value};
use tracing::{debug, info};

/// Locations of the base and user settings documents.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub defaults: PathBuf,
    pub user: PathBuf,
}

/// Build [`Settings`] from the base document, the user override, and `env`.
///
/// `env` is consulted for every `{ env = "NAME" }` reference; empty values count as unset.
/// Validation is a separate step so callers can inspect what was loaded.
pub fn load_settings<F>(paths: &ConfigPaths, env: F) -> Result<Settings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !paths.defaults.exists() {
        return Err(ConfigError::MissingDefaults(paths.defaults.clone()));
    }
    let mut merged = read_table(&paths.defaults)?;
    if paths.user.exists() {
        debug!(path = %paths.user.display(), "merging user settings");
        let user = read_table(&paths.user)?;
        deep_merge(&mut merged, user);
    }

    for section in REQUIRED_SECTIONS {
        info!("Loading configuration section {section}");
        let table = match merged.get_mut(*section) {
            Some(Value::Table(table)) if !table.is_empty() => table,
            _ => return Err(ConfigError::MissingSection((*section).to_string())),
        };
        resolve_env_refs(section, table, &env)?;
    }

    Ok(Settings {
        general: parse_section::<GeneralSettings>(&merged, "general")?,
        zetta: parse_section::<ZettaSettings>(&merged, "zetta")?,
        audio: parse_section::<AudioSettings>(&merged, "audio")?,
        notifications: parse_section::<NotificationSettings>(&merged, "notifications")?,
    })
}

fn read_table(path: &Path) -> Result<Table, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    text.parse::<Table>().map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merge `overlay` into `base`: tables merge key by key, anything else replaces.
pub(super) fn deep_merge(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match value {
            Value::Table(incoming) => match base.get_mut(&key) {
                Some(Value::Table(existing)) => deep_merge(existing, incoming),
                _ => {
                    base.insert(key, Value::Table(incoming));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}

/// Replace `{ env = "NAME", optional = bool }` entries with the variable's value.
///
/// Optional references that stay unset are removed so the field falls back to `None`.
pub(super) fn resolve_env_refs<F>(
    section: &str,
    table: &mut Table,
    env: &F,
) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let keys: Vec<String> = table.keys().cloned().collect();
    for key in keys {
        let Some(Value::Table(reference)) = table.get(&key) else {
            continue;
        };
        let Some(var) = reference.get("env").and_then(Value::as_str) else {
            continue;
        };
        let var = var.to_string();
        let optional = reference
            .get("optional")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        match env(&var).filter(|value| !value.is_empty()) {
            Some(value) => {
                table.insert(key, Value::String(value));
            }
            None if optional => {
                debug!(section, key = %key, var = %var, "optional setting left unset");
                table.remove(&key);
            }
            None => {
                return Err(ConfigError::MissingEnv {
                    section: section.to_string(),
                    key,
                    var,
                })
            }
        }
    }
    Ok(())
}

fn parse_section<T: DeserializeOwned>(merged: &Table, name: &str) -> Result<T, ConfigError> {
    let value = merged
        .get(name)
        .cloned()
        .ok_or_else(|| ConfigError::MissingSection(name.to_string()))?;
    value.try_into().map_err(|source| ConfigError::Invalid {
        section: name.to_string(),
        source,
    })
}
