// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Board document used when `--board` is not given.
    pub board: Option<PathBuf>,
    /// Scenario document used when `--scenario` is not given.
    pub scenario: Option<PathBuf>,
    /// Pretty print JSON output.
    pub pretty: bool,
    /// Cache level `usage` reports when `--level` is not given.
    pub usage_level: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            board: None,
            scenario: None,
            pretty: true,
            usage_level: 3,
        }
    }
}

// Maximum size for config file (1 MB)
const MAX_CONFIG_SIZE: u64 = 1024 * 1024;

/// Initialize config from `explicit` if given, otherwise from the first
/// config file found, otherwise fall back to the default config.
pub fn init_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => parse_config_file(path),
        None => match get_config_path() {
            Some(path) => parse_config_file(&path),
            None => Ok(Config::default()),
        },
    }
}

pub fn parse_config_file(filepath: &Path) -> Result<Config> {
    let metadata = fs::metadata(filepath)
        .with_context(|| format!("Failed to read metadata for {}", filepath.display()))?;
    if metadata.len() > MAX_CONFIG_SIZE {
        anyhow::bail!(
            "Config file {} is too large: {} bytes exceeds maximum of {}",
            filepath.display(),
            metadata.len(),
            MAX_CONFIG_SIZE
        );
    }

    let file_content = fs::read_to_string(filepath)
        .with_context(|| format!("Failed to read config file {}", filepath.display()))?;
    parse_config_content(&file_content)
}

fn get_config_path() -> Option<PathBuf> {
    let check_paths = ["/etc/catctl/config.toml", "/etc/catctl.toml"];

    for check_path in check_paths {
        let path = Path::new(check_path);
        if path.exists() {
            log::info!("Using config file: {}", check_path);
            return Some(path.to_path_buf());
        }
    }
    None
}

fn parse_config_content(file_content: &str) -> Result<Config> {
    if file_content.trim().is_empty() {
        anyhow::bail!("The config file is empty!")
    }

    let config: Config =
        toml::from_str(file_content).with_context(|| "Failed to parse TOML configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use crate::config::*;

    #[test]
    fn test_full_config() {
        let config_str = r#"
board = "/var/lib/catctl/board.json"
scenario = "/var/lib/catctl/scenario.json"
pretty = false
usage_level = 2
"#;

        let parsed_config = parse_config_content(config_str).expect("Failed to parse config");
        let expected_config = Config {
            board: Some(PathBuf::from("/var/lib/catctl/board.json")),
            scenario: Some(PathBuf::from("/var/lib/catctl/scenario.json")),
            pretty: false,
            usage_level: 2,
        };

        assert_eq!(parsed_config, expected_config);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let parsed_config =
            parse_config_content("board = \"board.json\"\n").expect("Failed to parse config");

        assert_eq!(parsed_config.board, Some(PathBuf::from("board.json")));
        assert_eq!(parsed_config.scenario, None);
        assert!(parsed_config.pretty);
        assert_eq!(parsed_config.usage_level, 3);
    }

    #[test]
    fn test_empty_config_is_an_error() {
        assert!(parse_config_content("").is_err());
        assert!(parse_config_content("\n  \n").is_err());
    }

    #[test]
    fn test_invalid_config() {
        assert!(parse_config_content("pretty = \"maybe\"").is_err());
    }

    #[test]
    fn test_explicit_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catctl.toml");
        fs::write(&path, "usage_level = 2\n").unwrap();

        let config = init_config(Some(&path)).unwrap();
        assert_eq!(config.usage_level, 2);
        assert!(init_config(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
