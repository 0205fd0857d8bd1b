use crate::config::{DetectorFormat, EngineConfig};
use crate::enrich::{
    enrich, parse_detection_answers, parse_detections, DetectionHit, Enrichment, LabelSet,
};
use crate::language::LanguageProfile;
use crate::layout::{Alignment, BlockSize, LayoutCursor, LayoutEngine, Position};
use crate::output::OutputTarget;
use crate::parser::{parse_observations, ContradictionFilter, ObservationRecord, ResponseFilter};
use crate::render::{
    decode_canvas, draw_detection_boxes, load_canvas, save_canvas, Compositor, FontSet, RenderError,
};
use crate::schedule::prioritize;
use crate::wrap::{description_lines, wrap_observation, WrapError};
use image::RgbaImage;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// External vision model. Calls block until the model answers; timeouts are
/// the implementor's business.
pub trait ObservationModel {
    fn observe(&self, image: &Path) -> anyhow::Result<String>;
    fn detect(&self, image: &Path) -> anyhow::Result<String>;
    fn suggest(&self, image: &Path, description: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStage {
    Observe,
    Detect,
}

impl fmt::Display for ModelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelStage::Observe => write!(f, "observation"),
            ModelStage::Detect => write!(f, "detection"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{stage} model call failed: {message}")]
    Model { stage: ModelStage, message: String },
    #[error(transparent)]
    Wrap(#[from] WrapError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

impl EngineError {
    fn model(stage: ModelStage, err: anyhow::Error) -> Self {
        EngineError::Model {
            stage,
            message: format!("{err:#}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub position: Position,
    pub size: BlockSize,
    pub action_required: bool,
    /// False when the padded panel runs past the canvas edge.
    pub fits: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationSummary {
    pub width: u32,
    pub height: u32,
    pub records: Vec<ObservationRecord>,
    pub labels: LabelSet,
    /// Text of every rendered block, blocks separated by a blank line.
    pub ai_text: String,
    pub placements: Vec<Placement>,
}

#[derive(Debug, Clone)]
pub struct AnnotationOutput {
    pub image: RgbaImage,
    pub summary: AnnotationSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedImage {
    pub input: PathBuf,
    pub target: OutputTarget,
    #[serde(flatten)]
    pub summary: AnnotationSummary,
}

pub struct AnnotationEngine {
    profile: LanguageProfile,
    alignment: Alignment,
    detector_format: DetectorFormat,
    filter: Option<Box<dyn ResponseFilter>>,
    detection_boxes: bool,
    fonts: FontSet,
}

impl fmt::Debug for AnnotationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotationEngine")
            .field("language", &self.profile.language)
            .field("alignment", &self.alignment)
            .field("detector_format", &self.detector_format)
            .field("filter", &self.filter.is_some())
            .field("detection_boxes", &self.detection_boxes)
            .field("fonts", &self.fonts)
            .finish()
    }
}

impl AnnotationEngine {
    pub fn new(profile: LanguageProfile, fonts: FontSet) -> Self {
        Self {
            profile,
            alignment: Alignment::Left,
            detector_format: DetectorFormat::Json,
            filter: None,
            detection_boxes: false,
            fonts,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, RenderError> {
        let profile = config.profile();
        let fonts = FontSet::load(
            config.header_font.as_deref(),
            config.body_font.as_deref(),
            &profile,
        )?;
        let mut engine = Self::new(profile, fonts)
            .with_alignment(config.alignment)
            .with_detector_format(config.detector_format)
            .with_detection_boxes(config.detection_boxes);
        if config.contradiction_filter {
            engine = engine.with_filter(ContradictionFilter::for_language(config.language));
        }
        Ok(engine)
    }

    pub fn with_alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_detector_format(mut self, detector_format: DetectorFormat) -> Self {
        self.detector_format = detector_format;
        self
    }

    /// Outline boxed detector hits on the frame before the panels go on.
    pub fn with_detection_boxes(mut self, enabled: bool) -> Self {
        self.detection_boxes = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl ResponseFilter + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn profile(&self) -> &LanguageProfile {
        &self.profile
    }

    /// Parse, enrich and schedule without touching any pixels.
    pub fn plan(&self, observation: &str, detector_reply: &str) -> Enrichment {
        self.plan_with_hits(observation, &self.detections(detector_reply))
    }

    fn detections(&self, detector_reply: &str) -> Vec<DetectionHit> {
        match self.detector_format {
            DetectorFormat::Json => parse_detections(detector_reply),
            DetectorFormat::Answers => parse_detection_answers(detector_reply, &self.profile),
        }
    }

    fn plan_with_hits(&self, observation: &str, hits: &[DetectionHit]) -> Enrichment {
        let observation = match &self.filter {
            Some(filter) => filter.filter(observation),
            None => observation.to_string(),
        };
        let records = parse_observations(&observation, &self.profile);
        let Enrichment { records, labels } = enrich(records, hits, &self.profile);
        Enrichment {
            records: prioritize(records),
            labels,
        }
    }

    /// Observation and detection failures abort the pass; a failed suggestion
    /// only falls back for its own record.
    pub fn annotate_canvas(
        &self,
        canvas: RgbaImage,
        image: &Path,
        model: &dyn ObservationModel,
    ) -> Result<AnnotationOutput, EngineError> {
        let observation = model
            .observe(image)
            .map_err(|err| EngineError::model(ModelStage::Observe, err))?;
        let detector_reply = model
            .detect(image)
            .map_err(|err| EngineError::model(ModelStage::Detect, err))?;
        let hits = self.detections(&detector_reply);
        let Enrichment { records, labels } = self.plan_with_hits(&observation, &hits);
        debug!(records = records.len(), labels = labels.len(), "planned annotation pass");

        let (width, height) = canvas.dimensions();
        let layout = LayoutEngine::new(width, height, self.alignment);
        let compositor = Compositor::new(&self.fonts, &self.profile);
        let mut cursor = LayoutCursor::new();
        let mut canvas = canvas;
        if self.detection_boxes {
            draw_detection_boxes(&mut canvas, &hits);
        }
        let mut texts = Vec::with_capacity(records.len());
        let mut placements = Vec::with_capacity(records.len());

        for record in &records {
            let lines = if record.action_required {
                let suggestion = match model.suggest(image, &record.description) {
                    Ok(reply) => reply,
                    Err(err) => {
                        warn!(
                            description = %record.description,
                            error = %format!("{err:#}"),
                            "suggestion call failed, using fallback"
                        );
                        String::new()
                    }
                };
                wrap_observation(
                    &record.description,
                    &suggestion,
                    self.profile.max_chars,
                    &self.profile,
                )?
            } else {
                description_lines(&record.description, &self.profile)?
            };

            let block = compositor.measure(lines);
            let (position, next) = layout.place_next(block.size, cursor, record.action_required);
            cursor = next;
            let fits = layout.fits(position, block.size);
            if !fits {
                warn!(
                    x = position.x,
                    y = position.y,
                    width = block.size.width,
                    height = block.size.height,
                    "panel extends past the canvas edge"
                );
            }
            canvas = compositor.draw(canvas, &block, position);
            texts.push(block.text());
            placements.push(Placement {
                position,
                size: block.size,
                action_required: record.action_required,
                fits,
            });
        }

        Ok(AnnotationOutput {
            image: canvas,
            summary: AnnotationSummary {
                width,
                height,
                records,
                labels,
                ai_text: texts.join("\n\n"),
                placements,
            },
        })
    }

    /// `source` is only handed to the model.
    pub fn annotate_bytes(
        &self,
        bytes: &[u8],
        source: &Path,
        model: &dyn ObservationModel,
    ) -> Result<AnnotationOutput, EngineError> {
        let canvas = decode_canvas(bytes)?;
        self.annotate_canvas(canvas, source, model)
    }

    pub fn process_image(
        &self,
        input: &Path,
        target: &OutputTarget,
        model: &dyn ObservationModel,
    ) -> Result<ProcessedImage, EngineError> {
        let canvas = load_canvas(input)?;
        let AnnotationOutput { image, summary } = self.annotate_canvas(canvas, input, model)?;
        save_canvas(image, &target.physical)?;
        info!(
            input = %input.display(),
            output = %target.physical.display(),
            records = summary.records.len(),
            labels = summary.labels.len(),
            "annotated image"
        );
        Ok(ProcessedImage {
            input: input.to_path_buf(),
            target: target.clone(),
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;
    use crate::layout::MARGIN;
    use anyhow::bail;
    use image::Rgba;
    use std::cell::RefCell;
    use tempfile::tempdir;

    #[derive(Default)]
    struct StubModel {
        observation: String,
        detection: String,
        suggestion: Option<String>,
        fail_observe: bool,
        suggested: RefCell<Vec<String>>,
    }

    impl ObservationModel for StubModel {
        fn observe(&self, _image: &Path) -> anyhow::Result<String> {
            if self.fail_observe {
                bail!("connection refused");
            }
            Ok(self.observation.clone())
        }

        fn detect(&self, _image: &Path) -> anyhow::Result<String> {
            Ok(self.detection.clone())
        }

        fn suggest(&self, _image: &Path, description: &str) -> anyhow::Result<String> {
            self.suggested.borrow_mut().push(description.to_string());
            match &self.suggestion {
                Some(reply) => Ok(reply.clone()),
                None => bail!("model timed out"),
            }
        }
    }

    fn engine(language: Language) -> AnnotationEngine {
        let profile = LanguageProfile::for_language(language);
        let fonts = FontSet::bitmap(&profile);
        AnnotationEngine::new(profile, fonts)
    }

    fn canvas() -> RgbaImage {
        RgbaImage::from_pixel(1600, 1200, Rgba([90, 120, 90, 255]))
    }

    fn descriptions(summary: &AnnotationSummary) -> Vec<&str> {
        summary.records.iter().map(|r| r.description.as_str()).collect()
    }

    #[test]
    fn informational_records_are_drawn_first() {
        let model = StubModel {
            observation: "Wet floor, yes\nCable on ground, no".to_string(),
            suggestion: Some("- place a warning sign".to_string()),
            ..StubModel::default()
        };
        let out = engine(Language::En)
            .annotate_canvas(canvas(), Path::new("frame.jpg"), &model)
            .unwrap();
        assert_eq!(descriptions(&out.summary), vec!["Cable on ground", "Wet floor"]);
        assert!(out.summary.labels.is_empty());
        assert_eq!(*model.suggested.borrow(), vec!["Wet floor".to_string()]);

        let placements = &out.summary.placements;
        assert_eq!(placements[0].position, Position { x: MARGIN, y: MARGIN });
        assert_eq!(placements[1].position.x, MARGIN);
        assert!(placements[1].position.y > placements[0].position.y);
        assert!(placements.iter().all(|p| p.fits));
        assert_eq!(
            out.summary.ai_text,
            "Description:\n- Cable on ground\n\nDescription:\n- Wet floor\nSuggestion:\n- place a warning sign"
        );
    }

    #[test]
    fn repeated_detector_label_adds_one_record() {
        let hit = r#"{"label":"unattended bag","bbox_2d":[100,100,200,200]}"#;
        let model = StubModel {
            observation: "Door closed, no".to_string(),
            detection: format!("[{hit},{hit}]"),
            ..StubModel::default()
        };
        let out = engine(Language::En)
            .annotate_canvas(canvas(), Path::new("frame.jpg"), &model)
            .unwrap();
        assert_eq!(
            descriptions(&out.summary),
            vec!["Door closed", "unattended bag detected"]
        );
        assert_eq!(out.summary.labels.len(), 1);
        assert!(out.summary.labels.contains("unattended bag"));
        // two informational panels share the first row
        let p = &out.summary.placements;
        assert_eq!(p[0].position.y, p[1].position.y);
        assert!(p[1].position.x > p[0].position.x);
    }

    #[test]
    fn failed_suggestion_falls_back() {
        let model = StubModel {
            observation: "Smoke near exit, yes".to_string(),
            suggestion: None,
            ..StubModel::default()
        };
        let out = engine(Language::En)
            .annotate_canvas(canvas(), Path::new("frame.jpg"), &model)
            .unwrap();
        assert!(out.summary.ai_text.ends_with("- please address promptly"));
    }

    #[test]
    fn placeholder_suggestion_never_rendered() {
        let model = StubModel {
            observation: "地面積水, 是".to_string(),
            suggestion: Some("-...，-...，-...".to_string()),
            ..StubModel::default()
        };
        let out = engine(Language::Zh)
            .annotate_canvas(canvas(), Path::new("frame.jpg"), &model)
            .unwrap();
        assert!(out.summary.ai_text.contains("請及時處理"));
        assert!(!out.summary.ai_text.contains("..."));
    }

    #[test]
    fn observation_failure_aborts_pass() {
        let model = StubModel {
            fail_observe: true,
            ..StubModel::default()
        };
        let err = engine(Language::En)
            .annotate_canvas(canvas(), Path::new("frame.jpg"), &model)
            .unwrap_err();
        match err {
            EngineError::Model { stage, message } => {
                assert_eq!(stage, ModelStage::Observe);
                assert!(message.contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_detector_reply_means_no_detections() {
        let model = StubModel {
            observation: "Gate closed, no".to_string(),
            detection: "I could not find anything".to_string(),
            ..StubModel::default()
        };
        let out = engine(Language::En)
            .annotate_canvas(canvas(), Path::new("frame.jpg"), &model)
            .unwrap();
        assert_eq!(out.summary.records.len(), 1);
        assert!(out.summary.labels.is_empty());
    }

    #[test]
    fn answer_mode_detector_and_filter() {
        let model = StubModel {
            observation: "No visible door, no\nGate is closed, yes".to_string(),
            detection: "smoker, yes\nwater puddle, no".to_string(),
            ..StubModel::default()
        };
        let engine = engine(Language::En)
            .with_detector_format(DetectorFormat::Answers)
            .with_filter(ContradictionFilter::english());
        let plan = engine.plan(&model.observation, &model.detection);
        let labels: Vec<&str> = plan.labels.iter().collect();
        assert_eq!(labels, vec!["smoker"]);
        assert!(plan
            .records
            .iter()
            .all(|r| !r.description.to_lowercase().contains("no visible")));
    }

    #[test]
    fn right_alignment_stacks_every_panel() {
        let model = StubModel {
            observation: "A, no\nB, no\nC, no".to_string(),
            ..StubModel::default()
        };
        let out = engine(Language::En)
            .with_alignment(Alignment::Right)
            .annotate_canvas(canvas(), Path::new("frame.jpg"), &model)
            .unwrap();
        let ys: Vec<i32> = out.summary.placements.iter().map(|p| p.position.y).collect();
        assert!(ys.windows(2).all(|w| w[1] > w[0]));
        assert!(out.summary.placements.iter().all(|p| p.position.x > MARGIN));
    }

    #[test]
    fn detection_boxes_are_opt_in() {
        let model = StubModel {
            observation: "Door closed, no".to_string(),
            detection: r#"[{"label":"smoker","bbox_2d":[800,800,900,900]}]"#.to_string(),
            ..StubModel::default()
        };
        let plain = engine(Language::En)
            .annotate_canvas(canvas(), Path::new("frame.jpg"), &model)
            .unwrap();
        assert_eq!(*plain.image.get_pixel(1280, 1000), Rgba([90, 120, 90, 255]));

        let boxed = engine(Language::En)
            .with_detection_boxes(true)
            .annotate_canvas(canvas(), Path::new("frame.jpg"), &model)
            .unwrap();
        assert_eq!(*boxed.image.get_pixel(1280, 1000), crate::render::BOX_COLOR);
        assert_eq!(*boxed.image.get_pixel(1360, 1000), Rgba([90, 120, 90, 255]));
        assert_eq!(boxed.summary.records, plain.summary.records);
    }

    #[test]
    fn process_image_writes_output() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("cam.png");
        canvas().save(&input).unwrap();
        let target = OutputTarget::dated(
            input.to_str().unwrap(),
            &dir.path().join("output"),
            chrono::NaiveDate::from_ymd_opt(2025, 10, 21)
                .and_then(|d| d.and_hms_opt(9, 5, 0))
                .unwrap(),
        );
        let model = StubModel {
            observation: "Cable on ground, no".to_string(),
            ..StubModel::default()
        };
        let processed = engine(Language::En)
            .process_image(&input, &target, &model)
            .unwrap();
        assert!(processed.target.physical.exists());
        assert_eq!(processed.target.logical, "AI/2025/10/21/09/images/cam_annotated.png");
        let written = image::open(&processed.target.physical).unwrap();
        assert_eq!(written.width(), 1600);
    }

    #[test]
    fn annotates_encoded_bytes() {
        let mut bytes = Vec::new();
        canvas()
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let model = StubModel {
            observation: "Cable on ground, no".to_string(),
            ..StubModel::default()
        };
        let out = engine(Language::En)
            .annotate_bytes(&bytes, Path::new("https://cams.example/frame.png"), &model)
            .unwrap();
        assert_eq!(out.image.dimensions(), (1600, 1200));
        assert_eq!(out.summary.records.len(), 1);

        let err = engine(Language::En)
            .annotate_bytes(b"garbage", Path::new("frame.png"), &model)
            .unwrap_err();
        assert!(matches!(err, EngineError::Render(RenderError::Decode { .. })));
    }

    #[test]
    fn process_image_reports_decode_failure() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("broken.png");
        std::fs::write(&input, b"not an image").unwrap();
        let target = OutputTarget::explicit(&dir.path().join("out.png"));
        let err = engine(Language::En)
            .process_image(&input, &target, &StubModel::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::Render(RenderError::Decode { .. })));
        assert!(!target.physical.exists());
    }
}
