use crate::language::{Language, LanguageProfile, Status};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub description: String,
    pub action_required: bool,
    pub language: Language,
}

impl ObservationRecord {
    pub fn new(description: impl Into<String>, action_required: bool, language: Language) -> Self {
        Self {
            description: description.into(),
            action_required,
            language,
        }
    }

    pub fn informational(description: impl Into<String>, language: Language) -> Self {
        Self::new(description, false, language)
    }
}

/// Every non-empty line yields one record. A line whose first part is empty
/// (`", yes"`) keeps the whole trimmed line as its description.
pub fn parse_observations(text: &str, profile: &LanguageProfile) -> Vec<ObservationRecord> {
    let mut records = Vec::new();
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split(',').collect();
        let (description, status) = if parts.len() >= 2 {
            (parts[0].trim(), profile.classify_status(parts[1]))
        } else {
            debug!(line, "line without comma, treating as informational");
            (line, Status::NonActionable)
        };

        let description = if description.is_empty() {
            line
        } else {
            description
        };

        records.push(ObservationRecord::new(
            description,
            status == Status::Actionable,
            profile.language,
        ));
    }
    debug!(count = records.len(), "parsed observation records");
    records
}

pub trait ResponseFilter: Send + Sync {
    fn filter(&self, response: &str) -> String;
}

/// Drops or normalizes lines a specific model tends to contradict itself on
/// (lamp status, "no visible ..." filler, closed gates).
#[derive(Debug, Clone, Default)]
pub struct ContradictionFilter {
    /// Lines containing any of these (lower-cased) are removed.
    pub drop_phrases: Vec<String>,
    /// A line containing both words of a pair collapses to `closed_replacement`.
    pub closed_pairs: Vec<(String, String)>,
    pub closed_replacement: String,
    /// Lines containing any of these are kept verbatim and suppress `all_phrases` lines.
    pub negated_phrases: Vec<String>,
    /// Lines containing any of these normalize to `all_replacement`.
    pub all_phrases: Vec<String>,
    pub all_replacement: String,
}

impl ContradictionFilter {
    pub fn english() -> Self {
        Self {
            drop_phrases: vec!["no emergency exit".to_string(), "no visible".to_string()],
            closed_pairs: vec![("gate".to_string(), "closed".to_string())],
            closed_replacement: "no".to_string(),
            negated_phrases: vec!["not all".to_string()],
            all_phrases: vec![
                "all fluorescent".to_string(),
                "all lit".to_string(),
            ],
            all_replacement: "All fluorescent lamps are lit up, no".to_string(),
        }
    }

    pub fn chinese() -> Self {
        Self {
            drop_phrases: vec!["沒有可見的門".to_string()],
            ..Self::default()
        }
    }

    pub fn for_language(language: Language) -> Self {
        match language {
            Language::En => Self::english(),
            Language::Zh => Self::chinese(),
        }
    }
}

impl ResponseFilter for ContradictionFilter {
    fn filter(&self, response: &str) -> String {
        let lines: Vec<&str> = response
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let contains_any = |low: &str, phrases: &[String]| phrases.iter().any(|p| low.contains(p.as_str()));
        let has_negated = lines
            .iter()
            .any(|l| contains_any(&l.to_lowercase(), &self.negated_phrases));

        let mut out = Vec::with_capacity(lines.len());
        for line in lines {
            let low = line.to_lowercase();
            if contains_any(&low, &self.drop_phrases) {
                continue;
            }
            if self
                .closed_pairs
                .iter()
                .any(|(a, b)| low.contains(a.as_str()) && low.contains(b.as_str()))
            {
                out.push(self.closed_replacement.clone());
                continue;
            }
            if contains_any(&low, &self.negated_phrases) {
                out.push(line.to_string());
                continue;
            }
            if contains_any(&low, &self.all_phrases) {
                if !has_negated {
                    out.push(self.all_replacement.clone());
                }
                continue;
            }
            out.push(line.to_string());
        }
        out.join("\n")
    }
}
