use crate::language::{is_cjk, Language, LanguageProfile};
use std::fmt;
use thiserror::Error;
use tracing::warn;

const BULLET: &str = "- ";
const INDENT: &str = "  ";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WrapError {
    #[error("observation description is empty")]
    EmptyDescription,
}

/// One display line. Whether it is drawn with the header font is decided by
/// comparing its text against the active profile's header tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLine {
    pub text: String,
}

impl TextLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for TextLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for TextLine {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

/// Lines for an informational record: the description header and one bullet.
pub fn description_lines(
    description: &str,
    profile: &LanguageProfile,
) -> Result<Vec<TextLine>, WrapError> {
    let description = description.trim();
    if description.is_empty() {
        return Err(WrapError::EmptyDescription);
    }
    Ok(vec![
        TextLine::new(profile.description_header.as_str()),
        TextLine::new(format!("{BULLET}{}", capitalize_first(description))),
    ])
}

/// Lines for an actionable record: description header, wrapped description,
/// suggestion header, then each suggestion line wrapped on its own.
///
/// An empty or placeholder suggestion is replaced by the profile's fallback
/// phrase.
pub fn wrap_observation(
    description: &str,
    suggestion: &str,
    max_chars: usize,
    profile: &LanguageProfile,
) -> Result<Vec<TextLine>, WrapError> {
    let description = description.trim();
    if description.is_empty() {
        return Err(WrapError::EmptyDescription);
    }
    let max_chars = max_chars.max(1);
    let wrap = |text: &str| match profile.language {
        Language::En => wrap_words(text, max_chars),
        Language::Zh => wrap_mixed(text, max_chars),
    };

    let mut lines = vec![TextLine::new(profile.description_header.as_str())];
    let description = match profile.language {
        Language::En => capitalize_first(description),
        Language::Zh => description.to_string(),
    };
    lines.extend(wrap(description.as_str()).into_iter().map(TextLine::new));

    lines.push(TextLine::new(profile.suggestion_header.as_str()));
    let mut items: Vec<&str> = suggestion
        .lines()
        .map(str::trim)
        .map(|item| item.strip_prefix('-').map(str::trim).unwrap_or(item))
        .filter(|item| !item.is_empty() && !profile.is_placeholder(item))
        .collect();
    if items.is_empty() {
        warn!(suggestion, "suggestion is empty or a placeholder, using fallback");
        items.push(profile.fallback_suggestion.as_str());
    }
    for item in items {
        lines.extend(wrap(item).into_iter().map(TextLine::new));
    }
    Ok(lines)
}

/// Greedy word wrap; the budget applies to the trimmed candidate line.
fn wrap_words(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = BULLET.to_string();
    for word in text.split_whitespace() {
        let candidate = format!("{current}{word} ");
        if candidate.trim().chars().count() > max_chars && current != BULLET {
            lines.push(current.trim_end().to_string());
            current = format!("{INDENT}{word} ");
        } else {
            current = candidate;
        }
    }
    if current.trim() != BULLET.trim() {
        lines.push(current.trim_end().to_string());
    }
    lines
}

/// Chinese wrap: wide glyphs are counted one at a time, embedded Latin runs
/// are kept whole up to the next space or punctuation mark.
fn wrap_mixed(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut lines = Vec::new();
    let mut current = BULLET.to_string();
    let mut current_len = BULLET.chars().count();

    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if ch.is_whitespace() {
            if !current.ends_with(' ') {
                current.push(' ');
                current_len += 1;
            }
            i += 1;
        } else if is_cjk(ch) || is_delimiter(ch) {
            if current_len >= max_chars && current != BULLET {
                flush_line(&mut current, &mut current_len, &mut lines, &ch.to_string());
            } else {
                current.push(ch);
                current_len += 1;
            }
            i += 1;
        } else {
            let start = i;
            while i < chars.len()
                && !chars[i].is_whitespace()
                && !is_cjk(chars[i])
                && !is_delimiter(chars[i])
            {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let word_len = i - start;
            if current_len + word_len > max_chars && current != BULLET {
                flush_line(&mut current, &mut current_len, &mut lines, &word);
            } else {
                current.push_str(&word);
                current_len += word_len;
            }
        }
    }

    let rest = current.trim();
    if !rest.is_empty() && rest != BULLET.trim() {
        lines.push(current.trim_end().to_string());
    }
    lines
}

fn flush_line(current: &mut String, current_len: &mut usize, lines: &mut Vec<String>, next: &str) {
    lines.push(current.trim_end().to_string());
    *current = format!("{INDENT}{next}");
    *current_len = current.chars().count();
}

fn is_delimiter(ch: char) -> bool {
    matches!(ch, ',' | '.' | ':' | ';' | '!' | '?')
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() => first.to_uppercase().chain(chars).collect(),
        Some(first) => std::iter::once(first).chain(chars).collect(),
        None => String::new(),
    }
}
