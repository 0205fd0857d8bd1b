use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Zh,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::En => write!(f, "en"),
            Language::Zh => write!(f, "zh"),
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Language::En),
            "zh" | "chinese" | "zh-hk" | "zh-tw" => Ok(Language::Zh),
            other => Err(format!("unsupported language: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Actionable,
    NonActionable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LanguageProfile {
    pub language: Language,
    pub description_header: String,
    pub suggestion_header: String,
    /// Normalized tokens that mark a record as actionable. The first entry is
    /// the canonical token for this language.
    pub actionable_tokens: Vec<String>,
    /// Normalized tokens that mark a record as informational. The first entry
    /// is the canonical token for this language.
    pub non_actionable_tokens: Vec<String>,
    pub max_chars: usize,
    /// Template for enriched detector records; `{label}` is substituted.
    pub detected_template: String,
    pub fallback_suggestion: String,
    /// Whole-reply placeholders (compared after normalization) that count as
    /// "no suggestion".
    pub placeholder_words: Vec<String>,
    pub header_font_px: f32,
    pub body_font_px: f32,
}

impl LanguageProfile {
    pub fn english() -> Self {
        Self {
            language: Language::En,
            description_header: "Description:".to_string(),
            suggestion_header: "Suggestion:".to_string(),
            actionable_tokens: vec!["yes".to_string()],
            non_actionable_tokens: vec!["no".to_string()],
            max_chars: 40,
            detected_template: "{label} detected".to_string(),
            fallback_suggestion: "please address promptly".to_string(),
            placeholder_words: vec!["n/a".to_string(), "na".to_string(), "none".to_string()],
            header_font_px: 32.0,
            body_font_px: 28.0,
        }
    }

    pub fn chinese() -> Self {
        Self {
            language: Language::Zh,
            description_header: "描述:".to_string(),
            suggestion_header: "建議:".to_string(),
            actionable_tokens: vec!["是".to_string(), "yes".to_string()],
            non_actionable_tokens: vec!["否".to_string(), "no".to_string()],
            max_chars: 25,
            detected_template: "檢測到{label}".to_string(),
            fallback_suggestion: "請及時處理".to_string(),
            placeholder_words: vec![
                "無".to_string(),
                "无".to_string(),
                "n/a".to_string(),
                "none".to_string(),
            ],
            header_font_px: 32.0,
            body_font_px: 26.0,
        }
    }

    pub fn for_language(language: Language) -> Self {
        match language {
            Language::En => Self::english(),
            Language::Zh => Self::chinese(),
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(1);
        self
    }

    pub fn classify_status(&self, raw: &str) -> Status {
        let token = normalize_status(raw);
        if self.actionable_tokens.iter().any(|t| *t == token) {
            Status::Actionable
        } else {
            // Unknown tokens fall through to informational.
            Status::NonActionable
        }
    }

    pub fn canonical_token(&self, status: Status) -> &str {
        let tokens = match status {
            Status::Actionable => &self.actionable_tokens,
            Status::NonActionable => &self.non_actionable_tokens,
        };
        tokens.first().map(String::as_str).unwrap_or_default()
    }

    pub fn is_header(&self, line: &str) -> bool {
        line == self.description_header || line == self.suggestion_header
    }

    pub fn detected_description(&self, label: &str) -> String {
        self.detected_template.replace("{label}", label.trim())
    }

    pub fn is_placeholder(&self, suggestion: &str) -> bool {
        let stripped: String = suggestion
            .chars()
            .filter(|ch| !is_placeholder_filler(*ch))
            .collect();
        if stripped.is_empty() {
            return true;
        }
        let lowered = stripped.to_lowercase();
        self.placeholder_words.iter().any(|word| *word == lowered)
    }
}

impl Default for LanguageProfile {
    fn default() -> Self {
        Self::english()
    }
}

/// Strips spaces and periods and lower-cases, so `" No."` and `"no"` compare equal.
pub fn normalize_status(raw: &str) -> String {
    raw.chars()
        .filter(|ch| !ch.is_whitespace() && !matches!(ch, '.' | '。'))
        .collect::<String>()
        .to_lowercase()
}

fn is_placeholder_filler(ch: char) -> bool {
    ch.is_whitespace()
        || matches!(
            ch,
            '-' | '–' | '—' | '.' | '…' | '。' | ',' | '，' | '、' | ';' | '；' | '·' | '_'
        )
}

/// Wide glyphs that the Chinese wrapper counts one by one: CJK ideographs plus
/// CJK and full-width punctuation.
pub fn is_cjk(ch: char) -> bool {
    matches!(ch,
        '\u{3000}'..='\u{303F}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{FF00}'..='\u{FFEF}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_variants_normalize_to_canonical() {
        let profile = LanguageProfile::english();
        for raw in ["no", "No", " no ", "no.", "N O."] {
            assert_eq!(profile.classify_status(raw), Status::NonActionable, "{raw}");
        }
        for raw in ["yes", "YES", " yes.", "Yes"] {
            assert_eq!(profile.classify_status(raw), Status::Actionable, "{raw}");
        }
    }

    #[test]
    fn unknown_status_is_informational() {
        let profile = LanguageProfile::english();
        assert_eq!(profile.classify_status("maybe"), Status::NonActionable);
        assert_eq!(profile.classify_status(""), Status::NonActionable);
    }

    #[test]
    fn chinese_profile_accepts_both_token_sets() {
        let profile = LanguageProfile::chinese();
        assert_eq!(profile.classify_status(" 是 "), Status::Actionable);
        assert_eq!(profile.classify_status("yes"), Status::Actionable);
        assert_eq!(profile.classify_status("否。"), Status::NonActionable);
        assert_eq!(profile.canonical_token(Status::Actionable), "是");
    }

    #[test]
    fn placeholder_detection() {
        let en = LanguageProfile::english();
        assert!(en.is_placeholder("-...，-...，-..."));
        assert!(en.is_placeholder("  - "));
        assert!(en.is_placeholder("…"));
        assert!(en.is_placeholder("N/A"));
        assert!(!en.is_placeholder("- Mop the floor"));

        let zh = LanguageProfile::chinese();
        assert!(zh.is_placeholder("無"));
        assert!(!zh.is_placeholder("- 立即清理"));
    }

    #[test]
    fn header_lookup_is_exact() {
        let en = LanguageProfile::english();
        assert!(en.is_header("Description:"));
        assert!(en.is_header("Suggestion:"));
        assert!(!en.is_header("Description: extra"));
        assert!(LanguageProfile::chinese().is_header("建議:"));
    }

    #[test]
    fn cjk_classification() {
        assert!(is_cjk('地'));
        assert!(is_cjk('，'));
        assert!(!is_cjk('a'));
        assert!(!is_cjk(' '));
    }

    #[test]
    fn language_parses_aliases() {
        assert_eq!("Chinese".parse::<Language>(), Ok(Language::Zh));
        assert_eq!("en".parse::<Language>(), Ok(Language::En));
        assert!("fr".parse::<Language>().is_err());
    }
}
