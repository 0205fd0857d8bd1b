pub mod config;
pub mod engine;
pub mod enrich;
pub mod language;
pub mod layout;
pub mod model;
pub mod output;
pub mod parser;
pub mod render;
pub mod report;
pub mod schedule;
pub mod wrap;

pub use config::{DetectorFormat, EngineConfig};
pub use engine::{
    AnnotationEngine, AnnotationOutput, AnnotationSummary, EngineError, ModelStage,
    ObservationModel, Placement, ProcessedImage,
};
pub use enrich::{DetectionHit, LabelSet};
pub use language::{Language, LanguageProfile};
pub use layout::{Alignment, LayoutCursor, LayoutEngine};
pub use output::OutputTarget;
pub use parser::{ContradictionFilter, ObservationRecord, ResponseFilter};
pub use render::{Compositor, DisplayBlock, FontSet, RenderError};
pub use wrap::{TextLine, WrapError};
