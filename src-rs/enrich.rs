use crate::language::LanguageProfile;
use crate::parser::{parse_observations, ObservationRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One detector hit. Boxes are normalized to a 0..1000 grid relative to the
/// image; answer-mode hits carry no box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionHit {
    pub label: String,
    #[serde(rename = "bbox_2d", default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
}

impl DetectionHit {
    pub fn new(label: impl Into<String>, bbox: Option<[f64; 4]>) -> Self {
        Self {
            label: label.into(),
            bbox,
        }
    }

    /// Box scaled to pixel coordinates for an image of the given size.
    pub fn pixel_box(&self, img_w: u32, img_h: u32) -> Option<[f64; 4]> {
        let [x0, y0, x1, y1] = self.bbox?;
        let w = f64::from(img_w);
        let h = f64::from(img_h);
        Some([x0 / 1000.0 * w, y0 / 1000.0 * h, x1 / 1000.0 * w, y1 / 1000.0 * h])
    }
}

/// Detector labels in first-seen order, without repeats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the label was already present.
    pub fn insert(&mut self, label: &str) -> bool {
        if self.contains(label) {
            return false;
        }
        self.labels.push(label.to_string());
        true
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    pub records: Vec<ObservationRecord>,
    pub labels: LabelSet,
}

/// Appends one informational record per previously unseen detector label.
pub fn enrich(
    records: Vec<ObservationRecord>,
    detections: &[DetectionHit],
    profile: &LanguageProfile,
) -> Enrichment {
    let mut records = records;
    let mut labels = LabelSet::new();
    for hit in detections {
        let label = hit.label.trim();
        if label.is_empty() {
            warn!("detector hit without a label skipped");
            continue;
        }
        if !labels.insert(label) {
            debug!(label, "duplicate detector label skipped");
            continue;
        }
        records.push(ObservationRecord::informational(
            profile.detected_description(label),
            profile.language,
        ));
    }
    Enrichment { records, labels }
}

/// Parses a detector reply holding a JSON array of `{label, bbox_2d}`.
///
/// Surrounding prose or code fences are ignored. Anything that does not parse
/// yields zero detections.
pub fn parse_detections(reply: &str) -> Vec<DetectionHit> {
    let span = extract_json_span(reply);
    if span.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<DetectionHit>>(span) {
        Ok(hits) => hits,
        Err(array_err) => match serde_json::from_str::<DetectionHit>(span) {
            Ok(hit) => vec![hit],
            Err(_) => {
                warn!(error = %array_err, "detector reply is not a detection array, using zero detections");
                Vec::new()
            }
        },
    }
}

/// Parses the `"<object>, yes|no"` answer form; only positive answers become hits.
pub fn parse_detection_answers(reply: &str, profile: &LanguageProfile) -> Vec<DetectionHit> {
    parse_observations(reply, profile)
        .into_iter()
        .filter(|record| record.action_required)
        .map(|record| DetectionHit::new(record.description, None))
        .collect()
}

fn extract_json_span(text: &str) -> &str {
    let start = match (text.find('{'), text.find('[')) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    let end = match (text.rfind('}'), text.rfind(']')) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    match (start, end) {
        (Some(s), Some(e)) if e >= s => &text[s..=e],
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;

    #[test]
    fn repeated_label_is_enriched_once() {
        let profile = LanguageProfile::english();
        let reply = r#"[{"label":"unattended bag","bbox_2d":[100,100,200,200]},
                        {"label":"unattended bag","bbox_2d":[100,100,200,200]}]"#;
        let hits = parse_detections(reply);
        assert_eq!(hits.len(), 2);

        let base = vec![ObservationRecord::new("Wet floor", true, Language::En)];
        let out = enrich(base, &hits, &profile);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[1].description, "unattended bag detected");
        assert!(!out.records[1].action_required);
        assert_eq!(out.labels.len(), 1);
        assert!(out.labels.contains("unattended bag"));
    }

    #[test]
    fn appended_records_follow_detector_order() {
        let profile = LanguageProfile::english();
        let hits = vec![
            DetectionHit::new("smoker", None),
            DetectionHit::new("cardboard", None),
            DetectionHit::new("smoker", None),
        ];
        let out = enrich(Vec::new(), &hits, &profile);
        let descriptions: Vec<&str> = out.records.iter().map(|r| r.description.as_str()).collect();
        assert_eq!(descriptions, vec!["smoker detected", "cardboard detected"]);
        assert_eq!(out.labels.iter().collect::<Vec<_>>(), vec!["smoker", "cardboard"]);
    }

    #[test]
    fn chinese_enrichment_uses_localized_template() {
        let profile = LanguageProfile::chinese();
        let out = enrich(Vec::new(), &[DetectionHit::new("水坑", None)], &profile);
        assert_eq!(out.records[0].description, "檢測到水坑");
        assert_eq!(out.records[0].language, Language::Zh);
    }

    #[test]
    fn malformed_detector_reply_means_no_detections() {
        assert!(parse_detections("I could not find anything").is_empty());
        assert!(parse_detections("[{\"name\": 3}]").is_empty());
        assert!(parse_detections("").is_empty());
    }

    #[test]
    fn fenced_json_is_extracted() {
        let reply = "Here you go:\n```json\n[{\"label\": \"smoker\", \"bbox_2d\": [1, 2, 3, 4]}]\n```";
        let hits = parse_detections(reply);
        assert_eq!(hits, vec![DetectionHit::new("smoker", Some([1.0, 2.0, 3.0, 4.0]))]);
        assert_eq!(
            hits[0].pixel_box(2000, 1000),
            Some([2.0, 2.0, 6.0, 4.0])
        );
    }

    #[test]
    fn answer_mode_keeps_positive_answers() {
        let profile = LanguageProfile::english();
        let hits = parse_detection_answers("plastic bag, yes\nwater puddle, no\nsmoker , Yes.", &profile);
        let labels: Vec<&str> = hits.iter().map(|h| h.label.as_str()).collect();
        assert_eq!(labels, vec!["plastic bag", "smoker"]);
        assert!(hits.iter().all(|h| h.bbox.is_none()));
    }
}
