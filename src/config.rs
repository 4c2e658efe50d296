use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::animator::AnimatorConfig;
use crate::error_codes::{CodedError, INVALID_CONFIG};
use crate::grid::GridConfig;

/// Settings file: both sections are optional and fall back to defaults.
///
/// ```yaml
/// grid:
///   columns: 120
/// animator:
///   wipe_hold_ticks: 24
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub grid: GridConfig,
    pub animator: AnimatorConfig,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.grid.validate().context("invalid grid settings")?;
        self.animator
            .validate()
            .context("invalid animator settings")?;
        Ok(())
    }
}

/// `None` yields defaults.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings {}", path.display()))?;
    let settings = parse_settings(&contents)
        .with_context(|| format!("failed to load settings {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

pub fn parse_settings(contents: &str) -> Result<Settings> {
    if contents.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml::from_str(contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| (location.line(), location.column()));
        let at = location
            .map(|(line, column)| format!("line {line}, column {column}"))
            .unwrap_or_else(|| "unknown location".to_owned());
        anyhow!(CodedError::usage(
            INVALID_CONFIG,
            format!("failed to parse yaml at {at}: {error}"),
        )
        .with_details(json!({
            "line": location.map(|(line, _)| line),
            "column": location.map(|(_, column)| column),
        })))
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{load_settings, parse_settings, Settings};
    use crate::error_codes::{find_coded_error, INVALID_CONFIG};

    #[test]
    fn empty_document_is_all_defaults() {
        assert_eq!(parse_settings("").expect("settings"), Settings::default());
        assert_eq!(load_settings(None).expect("settings"), Settings::default());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let settings = parse_settings(
            r#"
grid:
  columns: 96
animator:
  wipe_hold_ticks: 3
  stride_schedule:
    - { from_tick: 0, stride: 1 }
    - { from_tick: 50, stride: 4 }
"#,
        )
        .expect("settings");
        assert_eq!(settings.grid.columns, 96);
        assert_eq!(settings.grid.max_cells, 10_000);
        assert_eq!(settings.animator.wipe_hold_ticks, 3);
        assert_eq!(settings.animator.seed_count, 100);
        assert_eq!(settings.animator.stride_for(60), 4);
    }

    #[test]
    fn unknown_field_reports_location() {
        let error = parse_settings("animator:\n  seed_cuont: 10\n").unwrap_err();
        let coded = find_coded_error(&error).expect("coded");
        assert_eq!(coded.code, INVALID_CONFIG);
        assert!(coded.message.contains("line 2"), "{}", coded.message);
    }

    #[test]
    fn loaded_file_is_validated() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "animator:\n  completion_ratio: 1.5").expect("write");
        let error = load_settings(Some(file.path())).unwrap_err();
        assert_eq!(
            find_coded_error(&error).map(|coded| coded.code),
            Some(INVALID_CONFIG)
        );
    }

    #[test]
    fn infinite_speed_bound_fails_validation() {
        let settings = parse_settings("animator:\n  speed_max: .inf\n").expect("yaml parses");
        assert!(settings.animator.speed_max.is_infinite());
        let error = settings.validate().unwrap_err();
        assert_eq!(
            find_coded_error(&error).map(|coded| coded.code),
            Some(INVALID_CONFIG)
        );
    }
}
