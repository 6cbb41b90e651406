use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{flatten::InclusionSink, tree::normalize_path};

pub trait TreeItem {
    fn path(&self) -> &str;
    fn size(&self) -> u64;
    fn progress(&self) -> f64;
    fn included(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    pub progress: f64,
    pub wanted: bool,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, size: u64, progress: f64, wanted: bool) -> Self {
        Self {
            path: path.into(),
            size,
            progress,
            wanted,
        }
    }
}

impl<T: TreeItem + ?Sized> TreeItem for &T {
    fn path(&self) -> &str {
        (**self).path()
    }

    fn size(&self) -> u64 {
        (**self).size()
    }

    fn progress(&self) -> f64 {
        (**self).progress()
    }

    fn included(&self) -> bool {
        (**self).included()
    }
}

impl TreeItem for FileEntry {
    fn path(&self) -> &str {
        &self.path
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn progress(&self) -> f64 {
        self.progress
    }

    fn included(&self) -> bool {
        self.wanted
    }
}

impl InclusionSink for Vec<FileEntry> {
    fn set_included(&mut self, ids: &[String], included: bool) {
        let targets: HashSet<&str> = ids.iter().map(String::as_str).collect();
        for entry in self.iter_mut() {
            if targets.contains(normalize_path(&entry.path).as_str()) {
                entry.wanted = included;
            }
        }
    }
}

/// Must be pure: the same id always maps to the same name.
pub trait NameOverride {
    fn display_name(&self, id: &str) -> Option<String>;
}

impl<F> NameOverride for F
where
    F: Fn(&str) -> Option<String>,
{
    fn display_name(&self, id: &str) -> Option<String> {
        self(id)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverride;

impl NameOverride for NoOverride {
    fn display_name(&self, _id: &str) -> Option<String> {
        None
    }
}

/// Masks names for screen sharing. The file extension survives so the tree
/// still reads as a file listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrivacyMask;

impl NameOverride for PrivacyMask {
    fn display_name(&self, id: &str) -> Option<String> {
        let segment = id.rsplit('/').next().unwrap_or(id);
        let digest = fnv1a(id.as_bytes());
        let masked = match segment.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
                format!("hidden-{:08x}.{}", digest, ext)
            }
            _ => format!("hidden-{:08x}", digest),
        };
        Some(masked)
    }
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

pub fn format_progress(value: f64) -> String {
    format!("{:5.1}%", value * 100.0)
}

pub fn format_bytes(value: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut magnitude = value as f64;
    let mut unit = 0;
    while magnitude >= 1024.0 && unit < UNITS.len() - 1 {
        magnitude /= 1024.0;
        unit += 1;
    }
    format!("{:>6.1} {}", magnitude, UNITS[unit])
}
