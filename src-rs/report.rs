use crate::enrich::LabelSet;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const GENERIC_MODEL_TYPE: &str = "ai_description";
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub model_type: String,
    pub time: String,
    pub image_path: Vec<String>,
    pub ai_text: String,
    #[serde(flatten)]
    pub context: ReportContext,
}

/// One payload per unique detected label, or a single generic payload when
/// the detector found nothing.
pub fn build_payloads(
    labels: &LabelSet,
    image_paths: &[String],
    ai_text: &str,
    time: NaiveDateTime,
    context: &ReportContext,
) -> Vec<ReportPayload> {
    let time = time.format(TIME_FORMAT).to_string();
    let make = |model_type: &str| ReportPayload {
        model_type: model_type.to_string(),
        time: time.clone(),
        image_path: image_paths.to_vec(),
        ai_text: ai_text.to_string(),
        context: context.clone(),
    };
    if labels.is_empty() {
        vec![make(GENERIC_MODEL_TYPE)]
    } else {
        labels.iter().map(make).collect()
    }
}
