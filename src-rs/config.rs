use crate::language::{Language, LanguageProfile};
use crate::layout::Alignment;
use crate::output;
use crate::report::ReportContext;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::str::FromStr;

/// How the detector reply is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorFormat {
    /// JSON array of `{label, bbox_2d}` objects.
    #[default]
    Json,
    /// One `<object>, yes|no` line per object.
    Answers,
}

impl fmt::Display for DetectorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorFormat::Json => write!(f, "json"),
            DetectorFormat::Answers => write!(f, "answers"),
        }
    }
}

impl FromStr for DetectorFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(DetectorFormat::Json),
            "answers" => Ok(DetectorFormat::Answers),
            other => Err(format!("unsupported detector format: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub language: Language,
    pub alignment: Alignment,
    /// Overrides the language profile's wrap budget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_font: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_font: Option<PathBuf>,
    pub contradiction_filter: bool,
    pub detector_format: DetectorFormat,
    pub detection_boxes: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub robot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_root: Option<PathBuf>,
}

impl EngineConfig {
    /// Reads a JSON config from a file, or from stdin when `path` is `-`.
    pub fn load(path: &str) -> Result<Self> {
        let raw = if path == "-" {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read config from stdin")?;
            buf
        } else {
            fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {path}"))?
        };
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).context("invalid config JSON")
    }

    pub fn profile(&self) -> LanguageProfile {
        let profile = LanguageProfile::for_language(self.language);
        match self.max_chars {
            Some(max_chars) => profile.with_max_chars(max_chars),
            None => profile,
        }
    }

    pub fn out_root(&self) -> PathBuf {
        output::out_root(self.out_root.as_deref())
    }

    pub fn report_context(&self) -> ReportContext {
        ReportContext {
            robot: self.robot.clone(),
            camera: self.camera.clone(),
        }
    }
}
