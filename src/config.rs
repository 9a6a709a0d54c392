use crate::errors::{AppError, AppResult};
use crate::models::SyncSettings;
use std::path::Path;

/// Reads settings from an optional YAML file, falling back to defaults when the file is absent.
pub fn load_settings(path: Option<&Path>) -> AppResult<SyncSettings> {
    let Some(path) = path else {
        return Ok(SyncSettings::default());
    };
    if !path.is_file() {
        tracing::debug!(path = %path.display(), "settings file not found, using defaults");
        return Ok(SyncSettings::default());
    }

    let raw = std::fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(SyncSettings::default());
    }
    let settings: SyncSettings = serde_yaml::from_str(&raw)?;
    validate_settings(&settings)?;
    Ok(settings)
}

/// Applies a JSON merge patch on top of `current`; objects merge recursively, everything else replaces.
pub fn update_settings(current: &SyncSettings, update: serde_json::Value) -> AppResult<SyncSettings> {
    let mut merged = serde_json::to_value(current)?;
    merge_json(&mut merged, update);
    let settings: SyncSettings =
        serde_json::from_value(merged).map_err(|error| AppError::Invalid(error.to_string()))?;
    validate_settings(&settings)?;
    Ok(settings)
}

fn validate_settings(settings: &SyncSettings) -> AppResult<()> {
    if settings.poll_interval_ms == 0 {
        return Err(AppError::Invalid("pollIntervalMs must be greater than zero".to_string()));
    }
    if settings.event_capacity == 0 {
        return Err(AppError::Invalid("eventCapacity must be greater than zero".to_string()));
    }
    if settings.file_watch_interval_ms == 0 {
        return Err(AppError::Invalid(
            "fileWatchIntervalMs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{load_settings, update_settings};
    use crate::models::SyncSettings;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(Some(&dir.path().join("absent.yaml"))).expect("load");
        assert_eq!(settings, SyncSettings::default());
        assert_eq!(settings.poll_interval_ms, 4_000);
        assert_eq!(settings.save_cooldown_ms, 2_000);
        assert_eq!(settings.event_capacity, 1_000);
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "pollIntervalMs: 1500\nserverUrl: http://localhost:8080").expect("write");
        let settings = load_settings(Some(file.path())).expect("load");
        assert_eq!(settings.poll_interval_ms, 1_500);
        assert_eq!(settings.server_url, "http://localhost:8080");
        assert_eq!(settings.save_cooldown_ms, 2_000);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "pollIntervalMs: 0").expect("write");
        let error = load_settings(Some(file.path())).expect_err("zero interval");
        assert!(error.to_string().contains("pollIntervalMs"));
    }

    #[test]
    fn merge_patch_overrides_scalars() {
        let settings = update_settings(
            &SyncSettings::default(),
            json!({ "saveCooldownMs": 500, "logDir": "/tmp/logs" }),
        )
        .expect("update");
        assert_eq!(settings.save_cooldown_ms, 500);
        assert_eq!(settings.log_dir.as_deref(), Some("/tmp/logs"));
        assert_eq!(settings.poll_interval_ms, 4_000);
    }
}
