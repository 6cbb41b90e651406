use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::model::FileEntry;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {}: {}", .path.display(), .source)]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write {}: {}", .path.display(), .source)]
    Write { path: PathBuf, source: io::Error },
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("fileStats has {stats} entries but files has {files}")]
    StatsMismatch { files: usize, stats: usize },
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;

pub fn load_items(path: &Path) -> SourceResult<Vec<FileEntry>> {
    let contents = fs::read_to_string(path).map_err(|source| SourceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_items(&contents)
}

pub fn parse_items(contents: &str) -> SourceResult<Vec<FileEntry>> {
    let document: Document = serde_json::from_str(contents)?;
    match document {
        Document::Items(items) => Ok(items.into_iter().map(FileEntry::from).collect()),
        Document::Torrent(torrent) => torrent.into_entries(),
    }
}

/// A torrent object on disk keeps its layout: only `fileStats[].wanted` is
/// rewritten. Anything else is written as a plain item array.
pub fn save_items(path: &Path, items: &[FileEntry]) -> SourceResult<()> {
    let document = match read_existing(path)? {
        Some(mut torrent) if is_torrent(&torrent) => {
            patch_wanted(&mut torrent, items);
            torrent
        }
        _ => serde_json::to_value(items)?,
    };
    let mut body = serde_json::to_string_pretty(&document)?;
    body.push('\n');
    fs::write(path, body).map_err(|source| SourceError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn read_existing(path: &Path) -> SourceResult<Option<Value>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(serde_json::from_str(&contents).ok()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(SourceError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn is_torrent(document: &Value) -> bool {
    document.get("files").is_some_and(Value::is_array)
}

fn patch_wanted(document: &mut Value, items: &[FileEntry]) {
    let wanted: HashMap<&str, bool> = items
        .iter()
        .map(|entry| (entry.path.as_str(), entry.wanted))
        .collect();
    let flags: Vec<Option<bool>> = document["files"]
        .as_array()
        .map(|files| {
            files
                .iter()
                .map(|file| {
                    file.get("name")
                        .and_then(Value::as_str)
                        .and_then(|name| wanted.get(name).copied())
                })
                .collect()
        })
        .unwrap_or_default();
    let Some(object) = document.as_object_mut() else {
        return;
    };
    let key = if object.contains_key("file_stats") {
        "file_stats"
    } else {
        "fileStats"
    };
    let Some(stats) = object
        .entry(key)
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
    else {
        return;
    };
    if stats.is_empty() {
        stats.resize_with(flags.len(), || json!({}));
    }
    for (stat, flag) in stats.iter_mut().zip(flags) {
        if let (Some(stat), Some(flag)) = (stat.as_object_mut(), flag) {
            stat.insert("wanted".to_string(), Value::Bool(flag));
        }
    }
}

pub fn modified(path: &Path) -> SourceResult<SystemTime> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|source| SourceError::Read {
            path: path.to_path_buf(),
            source,
        })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Document {
    Items(Vec<ItemWire>),
    Torrent(TorrentWire),
}

#[derive(Debug, Deserialize)]
struct ItemWire {
    #[serde(alias = "name")]
    path: String,
    #[serde(default, alias = "length")]
    size: u64,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default, alias = "bytesCompleted")]
    bytes_completed: Option<u64>,
    #[serde(default = "default_wanted", alias = "included")]
    wanted: bool,
}

impl From<ItemWire> for FileEntry {
    fn from(wire: ItemWire) -> Self {
        let progress = match (wire.progress, wire.bytes_completed) {
            (Some(progress), _) => progress,
            (None, Some(done)) => completed_fraction(done, wire.size),
            (None, None) => 0.0,
        };
        FileEntry::new(wire.path, wire.size, progress, wire.wanted)
    }
}

#[derive(Debug, Deserialize)]
struct TorrentWire {
    files: Vec<FileWire>,
    #[serde(default, alias = "fileStats")]
    file_stats: Vec<FileStatWire>,
}

#[derive(Debug, Deserialize)]
struct FileWire {
    name: String,
    #[serde(default)]
    length: u64,
    #[serde(default, alias = "bytesCompleted")]
    bytes_completed: u64,
}

#[derive(Debug, Deserialize)]
struct FileStatWire {
    #[serde(default, alias = "bytesCompleted")]
    bytes_completed: Option<u64>,
    #[serde(default = "default_wanted")]
    wanted: bool,
}

impl TorrentWire {
    fn into_entries(self) -> SourceResult<Vec<FileEntry>> {
        if !self.file_stats.is_empty() && self.file_stats.len() != self.files.len() {
            return Err(SourceError::StatsMismatch {
                files: self.files.len(),
                stats: self.file_stats.len(),
            });
        }
        let mut stats = self.file_stats.into_iter();
        let entries = self
            .files
            .into_iter()
            .map(|file| {
                let stat = stats.next();
                let done = stat
                    .as_ref()
                    .and_then(|stat| stat.bytes_completed)
                    .unwrap_or(file.bytes_completed);
                let wanted = stat.map(|stat| stat.wanted).unwrap_or(true);
                FileEntry::new(
                    file.name,
                    file.length,
                    completed_fraction(done, file.length),
                    wanted,
                )
            })
            .collect();
        Ok(entries)
    }
}

fn default_wanted() -> bool {
    true
}

fn completed_fraction(done: u64, size: u64) -> f64 {
    if size == 0 {
        0.0
    } else {
        (done as f64 / size as f64).min(1.0)
    }
}
