//! Config file loader.
//!
//! The format follows the extension: `.json` is read with serde_json,
//! `.toml` with toml.

use super::PatcherConfig;
use crate::error::ConfigError;
use std::fs;
use std::path::Path;

/// Supported config file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

/// Load and validate a config file.
pub fn load_config_from_file(path: &Path) -> Result<PatcherConfig, ConfigError> {
    // Validate the path first
    let format = validate_config_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!(
                "Configuration file not found at: {}",
                path.display()
            ))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let config = parse_config(&content, format)?;
    config.validate()?;

    log::info!(
        "[Config] Loaded {} ({} extra operation(s), {} extra check(s))",
        path.display(),
        config.operations.len(),
        config.checks.len()
    );
    Ok(config)
}

/// Parse config text without touching the filesystem.
pub fn parse_config(content: &str, format: ConfigFormat) -> Result<PatcherConfig, ConfigError> {
    match format {
        ConfigFormat::Json => Ok(serde_json::from_str(content)?),
        ConfigFormat::Toml => Ok(toml::from_str(content)?),
    }
}

/// Validate config path (.json or .toml extension required).
pub fn validate_config_path(path: &Path) -> Result<ConfigFormat, ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path cannot be empty".to_string(),
        ));
    }

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(ConfigFormat::Json),
        Some("toml") => Ok(ConfigFormat::Toml),
        Some(ext) => Err(ConfigError::ValidationFailed(format!(
            "Configuration file must have .json or .toml extension, got .{}",
            ext
        ))),
        None => Err(ConfigError::ValidationFailed(
            "Configuration file must have .json or .toml extension".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OccurrenceSpec, SignatureSpec};
    use crate::models::InsertMode;
    use tempfile::TempDir;

    const TOML_CONFIG: &str = r#"
backup = true
skip_operations = ["kallsyms_hide_symbols"]

[[operations]]
id = "foo_hook"
target = "drivers/foo.c"
content = "{indent}foo_hook();\n"
mode = "insert_before"
signature = { contains = "foo_hook();" }

[[operations.anchors]]
literal = "\treturn 0;\n"
occurrence = "within"
marker = "static int foo_probe("

[[checks]]
file = "drivers/foo.c"
label = "foo_probe calls foo_hook"
call_site = "foo_hook"
within = "static int foo_probe("
"#;

    #[test]
    fn test_validate_config_path() {
        assert_eq!(validate_config_path(Path::new("a.json")).unwrap(), ConfigFormat::Json);
        assert_eq!(validate_config_path(Path::new("a.toml")).unwrap(), ConfigFormat::Toml);
        assert!(validate_config_path(Path::new("a.yaml")).is_err());
        assert!(validate_config_path(Path::new("config")).is_err());
        assert!(validate_config_path(Path::new("")).is_err());
    }

    #[test]
    fn test_parse_toml() {
        let config = parse_config(TOML_CONFIG, ConfigFormat::Toml).unwrap();
        assert!(config.backup);
        assert!(config.builtin_plan);
        assert_eq!(config.operations.len(), 1);

        let op = &config.operations[0];
        assert_eq!(op.mode, InsertMode::InsertBefore);
        assert!(op.required);
        assert!(matches!(op.signature, SignatureSpec::Contains(_)));
        assert_eq!(op.anchors[0].occurrence, OccurrenceSpec::Within);
        assert_eq!(config.checks[0].call_site.as_deref(), Some("foo_hook"));
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "builtin_plan": false,
            "dry_run": true,
            "operations": [{
                "id": "bar",
                "label": "bar decl",
                "target": "fs/bar.c",
                "content": "int bar;\n",
                "mode": "insert_after",
                "required": false,
                "signature": {"within": {"marker": "struct bar {", "inner": {"contains": "int bar;"}}},
                "anchors": [{"regex": "(?m)^struct bar \\{\\n"}]
            }]
        }"#;
        let config = parse_config(json, ConfigFormat::Json).unwrap();
        assert!(config.dry_run);
        assert!(!config.operations[0].required);
        let plan = config.build_plan().unwrap();
        assert_eq!(plan.len(), 1);
        assert!(!plan[0].required);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = load_config_from_file(&temp_dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config_from_file(&path), Err(ConfigError::InvalidJson(_))));
    }

    #[test]
    fn test_load_rejects_unknown_skip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("patcher.toml");
        fs::write(&path, "skip_operations = [\"typo_op\"]\n").unwrap();
        assert!(matches!(
            load_config_from_file(&path),
            Err(ConfigError::ValidationFailed(_))
        ));
    }
}
