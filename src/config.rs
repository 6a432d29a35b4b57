use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use dirs::{config_dir, home_dir};
use serde::Deserialize;

use pathwright::ops::{DEFAULT_CHUNK_SIZE, REDRAW_INTERVAL};

#[derive(Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    command_aliases: HashMap<String, String>,
    #[serde(default)]
    log_file: Option<String>,
    #[serde(default)]
    redraw_interval_ms: Option<u64>,
    #[serde(default)]
    copy_chunk_size: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub command_aliases: HashMap<String, String>,
    pub log_file: Option<PathBuf>,
    pub redraw_interval: Duration,
    pub copy_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        let mut aliases = HashMap::new();
        aliases.insert("rm".into(), "delete".into());
        aliases.insert("cp".into(), "copy".into());
        aliases.insert("mv".into(), "move".into());
        Self {
            command_aliases: aliases,
            log_file: None,
            redraw_interval: REDRAW_INTERVAL,
            copy_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Config {
    fn merge(&mut self, raw: RawConfig) {
        for (alias, command) in raw.command_aliases {
            self.command_aliases
                .insert(alias.to_lowercase(), command.to_lowercase());
        }
        if let Some(path) = raw.log_file {
            self.log_file = Some(expand_home(&path));
        }
        if let Some(ms) = raw.redraw_interval_ms {
            self.redraw_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(size) = raw.copy_chunk_size {
            self.copy_chunk_size = size.max(1);
        }
    }
}

pub fn parse_config(contents: &str) -> Result<Config> {
    let raw: RawConfig = toml::from_str(contents)?;
    let mut config = Config::default();
    config.merge(raw);
    Ok(config)
}

/// Reads `<config_dir>/pathwright/config.toml`. Runs before the terminal is
/// switched to raw mode, so a broken file is reported on stderr.
pub fn load_config() -> Config {
    let Some(dir) = config_dir() else {
        return Config::default();
    };
    let path = dir.join("pathwright").join("config.toml");
    let Ok(contents) = fs::read_to_string(&path) else {
        return Config::default();
    };
    match parse_config(&contents) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to parse config {}: {err:#}", path.display());
            Config::default()
        }
    }
}

/// Installs the file logger when `log_file` is set; logging stays off otherwise.
pub fn init_logging(config: &Config) -> Result<()> {
    let Some(path) = &config.log_file else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|err| anyhow!("installing logger: {err}"))
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| Path::new(path).to_path_buf()),
        None if path == "~" => home_dir().unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_survive_an_empty_file() -> Result<()> {
        let config = parse_config("")?;
        assert_eq!(config.command_aliases.get("cp").map(String::as_str), Some("copy"));
        assert_eq!(config.redraw_interval, Duration::from_millis(50));
        assert_eq!(config.copy_chunk_size, 32 * 1024);
        assert!(config.log_file.is_none());
        Ok(())
    }

    #[test]
    fn file_values_override_defaults() -> Result<()> {
        let config = parse_config(
            r#"
            log_file = "/var/tmp/pathwright.log"
            redraw_interval_ms = 100
            copy_chunk_size = 0

            [command_aliases]
            DEL = "Delete"
            "#,
        )?;
        assert_eq!(config.command_aliases.get("del").map(String::as_str), Some("delete"));
        assert_eq!(config.command_aliases.get("rm").map(String::as_str), Some("delete"));
        assert_eq!(config.log_file.as_deref(), Some(Path::new("/var/tmp/pathwright.log")));
        assert_eq!(config.redraw_interval, Duration::from_millis(100));
        assert_eq!(config.copy_chunk_size, 1);
        Ok(())
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(parse_config("copy_chunk_size = \"big\"").is_err());
    }

    #[test]
    fn home_prefix_is_expanded() {
        if let Some(home) = home_dir() {
            assert_eq!(expand_home("~/logs/pw.log"), home.join("logs/pw.log"));
        }
        assert_eq!(expand_home("/abs/pw.log"), PathBuf::from("/abs/pw.log"));
    }
}
