use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use dirs::config_dir;
use log::LevelFilter;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub input: PathBuf,
    pub poll_interval: Duration,
    pub log_level: LevelFilter,
    pub privacy: bool,
    pub expand_new: bool,
    pub print: bool,
    pub search: Option<String>,
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Browse a torrent's files as a tree", long_about = None)]
pub struct Cli {
    /// JSON file with the item list or a torrent-get style torrent object
    pub input: Option<PathBuf>,
    #[arg(long)]
    pub poll_interval: Option<f64>,
    #[arg(long, action = ArgAction::SetTrue)]
    pub privacy: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    pub collapsed: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    pub print: bool,
    #[arg(long)]
    pub search: Option<String>,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    input: Option<PathBuf>,
    poll_interval: Option<f64>,
    privacy: Option<bool>,
    expand_new: Option<bool>,
    log_level: Option<String>,
}

pub fn build_config(cli: &Cli) -> Result<AppConfig> {
    let file_config = load_file_config(cli.config.as_deref())?;

    let input = cli
        .input
        .clone()
        .or_else(|| env::var_os("TORRENT_TREE_INPUT").map(PathBuf::from))
        .or_else(|| file_config.as_ref().and_then(|cfg| cfg.input.clone()))
        .context("no input file given (pass a path or set TORRENT_TREE_INPUT)")?;

    let poll_secs = cli
        .poll_interval
        .or_else(|| env_var_parse("TORRENT_TREE_POLL_INTERVAL"))
        .or_else(|| file_config.as_ref().and_then(|cfg| cfg.poll_interval))
        .unwrap_or(2.0);

    if !poll_secs.is_finite() || poll_secs < 0.0 {
        anyhow::bail!("poll interval must be a finite number of seconds, got {poll_secs}");
    }

    let privacy = cli.privacy
        || env_bool("TORRENT_TREE_PRIVACY")
            .or_else(|| file_config.as_ref().and_then(|cfg| cfg.privacy))
            .unwrap_or(false);

    let expand_new = if cli.collapsed {
        false
    } else {
        env_bool("TORRENT_TREE_EXPAND_NEW")
            .or_else(|| file_config.as_ref().and_then(|cfg| cfg.expand_new))
            .unwrap_or(true)
    };

    let log_level_str = cli
        .log_level
        .clone()
        .or_else(|| env::var("TORRENT_TREE_LOG_LEVEL").ok())
        .or_else(|| file_config.as_ref().and_then(|cfg| cfg.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    let log_level = LevelFilter::from_str(&log_level_str).unwrap_or(LevelFilter::Info);

    Ok(AppConfig {
        input,
        poll_interval: Duration::from_secs_f64(poll_secs),
        log_level,
        privacy,
        expand_new,
        print: cli.print,
        search: cli.search.clone().filter(|query| !query.trim().is_empty()),
    })
}

fn load_file_config(path: Option<&Path>) -> Result<Option<FileConfig>> {
    if let Some(path) = path {
        return read_file_config(path);
    }

    if let Ok(env_path) = env::var("TORRENT_TREE_CONFIG") {
        return read_file_config(Path::new(&env_path));
    }

    if let Some(dir) = config_dir() {
        let path = dir.join("torrent-file-tree").join("config.toml");
        return read_file_config(&path);
    }

    Ok(None)
}

fn read_file_config(path: &Path) -> Result<Option<FileConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let parsed: FileConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(Some(parsed))
}

fn env_var_parse<T>(name: &str) -> Option<T>
where
    T: FromStr,
{
    env::var(name).ok().and_then(|value| value.parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .and_then(|value| match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}
