use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const OUT_DIR_ENV: &str = "SURVEIL_OVERLAY_OUT_DIR";
pub const DEFAULT_OUT_ROOT: &str = "output";
pub const LOGICAL_ROOT: &str = "AI";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputTarget {
    pub physical: PathBuf,
    pub logical: String,
}

impl OutputTarget {
    pub fn explicit(path: &Path) -> Self {
        Self {
            physical: path.to_path_buf(),
            logical: path.display().to_string(),
        }
    }

    pub fn dated(source: &str, root: &Path, now: NaiveDateTime) -> Self {
        let file_name = annotated_file_name(source, now);
        let partition = [
            now.format("%Y").to_string(),
            now.format("%m").to_string(),
            now.format("%d").to_string(),
            now.format("%H").to_string(),
        ];
        let mut physical = root.to_path_buf();
        for part in &partition {
            physical.push(part);
        }
        physical.push("images");
        physical.push(&file_name);
        let logical = format!("{LOGICAL_ROOT}/{}/images/{file_name}", partition.join("/"));
        Self { physical, logical }
    }
}

pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

// URL segments without an extension or shorter than five chars fall back to
// a timestamp name.
pub fn annotated_file_name(source: &str, now: NaiveDateTime) -> String {
    let name = if is_url(source) {
        let segment = source.rsplit('/').next().unwrap_or_default();
        let segment = segment.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();
        if !segment.contains('.') || segment.chars().count() < 5 {
            format!("image_{}.jpg", now.format("%Y%m%d_%H%M%S"))
        } else {
            segment.to_string()
        }
    } else {
        Path::new(source)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image")
            .to_string()
    };

    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}_annotated.{ext}"),
        None => format!("{name}_annotated.jpg"),
    }
}

pub fn out_root(configured: Option<&Path>) -> PathBuf {
    env::var(OUT_DIR_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| configured.map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_ROOT))
}

pub fn default_sidecar_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("{stem}.json"))
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

pub fn write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    ensure_parent_dir(path)?;
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("failed to write JSON: {}", path.display()))?;
    Ok(())
}

pub fn abs_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}
