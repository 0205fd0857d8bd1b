use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use surveil_overlay::config::{DetectorFormat, EngineConfig};
use surveil_overlay::engine::{AnnotationEngine, ObservationModel, ProcessedImage};
use surveil_overlay::enrich::LabelSet;
use surveil_overlay::language::Language;
use surveil_overlay::layout::Alignment;
use surveil_overlay::model::{CommandModel, Prompts, ScriptedModel, DEFAULT_DETECTION_OBJECTS};
use surveil_overlay::output::{
    abs_path, annotated_file_name, default_sidecar_for, write_json_pretty, OutputTarget,
};
use surveil_overlay::report::{build_payloads, ReportContext};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Parser, Debug)]
#[command(
    name = "surveil-overlay",
    version,
    about = "Annotate surveillance frames with observation panels from a vision model"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Parse model text into scheduled observation records
    Parse(ParseArgs),
    /// Annotate one image or every image in a directory
    Annotate(AnnotateArgs),
    /// Build downstream report payloads from annotation sidecars
    Report(ReportArgs),
}

/// Flags shared by every command that builds an engine. Values given here
/// override the config file.
#[derive(Args, Debug)]
struct EngineArgs {
    /// Engine config JSON (or - for stdin)
    #[arg(long)]
    config: Option<String>,
    /// Annotation language (en|zh)
    #[arg(long)]
    language: Option<Language>,
    /// Panel alignment (left|right)
    #[arg(long)]
    align: Option<Alignment>,
    /// Detector reply format (json|answers)
    #[arg(long)]
    detector_format: Option<DetectorFormat>,
    /// Override the wrap budget of the language profile
    #[arg(long)]
    max_chars: Option<usize>,
    /// TrueType font for header lines
    #[arg(long)]
    header_font: Option<PathBuf>,
    /// TrueType font for body lines (default: header font)
    #[arg(long)]
    body_font: Option<PathBuf>,
    /// Enable the contradiction pre-filter on the observation reply
    #[arg(long, action = ArgAction::SetTrue)]
    filter: bool,
    /// Outline detector boxes on the image
    #[arg(long, action = ArgAction::SetTrue)]
    boxes: bool,
}

#[derive(Args, Debug)]
struct ParseArgs {
    /// Observation text file (or - for stdin)
    #[arg(long)]
    text: String,
    /// Detector reply file
    #[arg(long)]
    detections: Option<PathBuf>,
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Args, Debug)]
struct AnnotateArgs {
    /// Input image, or a directory of jpg/jpeg/png/bmp images
    input: PathBuf,
    /// Output image path (directory when the input is a directory).
    /// Default: <out root>/YYYY/MM/DD/HH/images/<stem>_annotated.<ext>
    #[arg(long)]
    output: Option<PathBuf>,
    #[command(flatten)]
    engine: EngineArgs,
    /// Canned observation reply
    #[arg(long)]
    observations: Option<PathBuf>,
    /// Canned detector reply
    #[arg(long)]
    detections: Option<PathBuf>,
    /// Canned suggestion reply, or a JSON object keyed by description
    #[arg(long)]
    suggestions: Option<PathBuf>,
    /// External model command; receives the prompt on stdin and --image <path>
    #[arg(long)]
    model_cmd: Option<String>,
    /// Seconds before a model command is killed
    #[arg(long, default_value_t = 120)]
    model_timeout: u64,
    /// Path to write the metadata sidecar (single image only; default: <output>.json)
    #[arg(long)]
    meta_out: Option<PathBuf>,
    /// Disable metadata sidecar output
    #[arg(long, action = ArgAction::SetTrue)]
    no_meta: bool,
    /// Print the annotation summary JSON instead of output paths
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Annotation sidecar JSON files
    #[arg(long = "meta", required = true, num_args = 1..)]
    meta: Vec<PathBuf>,
    #[arg(long)]
    robot: Option<String>,
    #[arg(long)]
    camera: Option<String>,
}

/// The part of an annotation sidecar the report needs.
#[derive(Debug, Deserialize)]
struct SidecarView {
    target: TargetView,
    labels: LabelSet,
    ai_text: String,
}

#[derive(Debug, Deserialize)]
struct TargetView {
    logical: String,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("surveil_overlay=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Commands => print_commands(),
        Commands::Parse(args) => command_parse(args),
        Commands::Annotate(args) => command_annotate(args),
        Commands::Report(args) => command_report(args),
    }
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({
            "name": "parse",
            "description": "Parse, enrich and schedule model text into observation records.",
        }),
        json!({
            "name": "annotate",
            "description": "Draw observation panels onto an image or a directory of images.",
        }),
        json!({
            "name": "report",
            "description": "Build downstream payload JSON from annotation sidecars.",
        }),
    ];

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "commands": rows }))?
    );
    Ok(())
}

fn resolve_config(args: &EngineArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(language) = args.language {
        config.language = language;
    }
    if let Some(align) = args.align {
        config.alignment = align;
    }
    if let Some(format) = args.detector_format {
        config.detector_format = format;
    }
    if let Some(max_chars) = args.max_chars {
        config.max_chars = Some(max_chars);
    }
    if let Some(path) = &args.header_font {
        config.header_font = Some(path.clone());
    }
    if let Some(path) = &args.body_font {
        config.body_font = Some(path.clone());
    }
    if args.filter {
        config.contradiction_filter = true;
    }
    if args.boxes {
        config.detection_boxes = true;
    }
    Ok(config)
}

fn read_text_arg(path: &str) -> Result<String> {
    if path == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read text from stdin")?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("failed to read text file: {path}"))
}

fn command_parse(args: ParseArgs) -> Result<()> {
    let config = resolve_config(&args.engine)?;
    let engine = AnnotationEngine::from_config(&config)?;
    let text = read_text_arg(&args.text)?;
    let detections = match &args.detections {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read detections: {}", path.display()))?,
        None => String::new(),
    };

    let plan = engine.plan(&text, &detections);
    let payload = json!({
        "language": config.language,
        "records": plan.records,
        "labels": plan.labels,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn build_model(args: &AnnotateArgs, config: &EngineConfig) -> Result<Box<dyn ObservationModel>> {
    if let Some(command) = &args.model_cmd {
        let prompts = Prompts::for_language(
            config.language,
            config.detector_format,
            &DEFAULT_DETECTION_OBJECTS,
        );
        return Ok(Box::new(CommandModel::new(command, prompts, args.model_timeout)?));
    }
    match &args.observations {
        Some(observations) => Ok(Box::new(ScriptedModel::from_files(
            observations,
            args.detections.as_deref(),
            args.suggestions.as_deref(),
        )?)),
        None => bail!("either --model-cmd or --observations is required"),
    }
}

fn command_annotate(args: AnnotateArgs) -> Result<()> {
    if !args.input.exists() {
        bail!("input not found: {}", args.input.display());
    }

    let config = resolve_config(&args.engine)?;
    let engine = AnnotationEngine::from_config(&config)?;
    let model = build_model(&args, &config)?;
    let out_root = config.out_root();

    let inputs = if args.input.is_dir() {
        if args.meta_out.is_some() {
            bail!("--meta-out only applies to a single input image");
        }
        list_images(&args.input)?
    } else {
        vec![args.input.clone()]
    };
    if inputs.is_empty() {
        bail!("no images found in {}", args.input.display());
    }
    let batch = args.input.is_dir();

    let mut results = Vec::new();
    let mut failed = 0usize;
    for input in &inputs {
        let now = Local::now().naive_local();
        let source = input.display().to_string();
        let target = match (&args.output, batch) {
            (Some(dir), true) => OutputTarget::explicit(&dir.join(annotated_file_name(&source, now))),
            (Some(path), false) => OutputTarget::explicit(path),
            (None, _) => OutputTarget::dated(&source, &out_root, now),
        };

        let outcome = engine
            .process_image(input, &target, model.as_ref())
            .map_err(anyhow::Error::from)
            .and_then(|processed| {
                if !args.no_meta {
                    write_sidecar(&processed, args.meta_out.as_deref(), &config)?;
                }
                Ok(processed)
            });
        match outcome {
            Ok(processed) => results.push(processed),
            Err(err) if batch => {
                error!(input = %input.display(), error = %format!("{err:#}"), "failed to annotate image");
                failed += 1;
            }
            Err(err) => return Err(err.context(format!("failed to annotate {}", input.display()))),
        }
    }

    if args.json {
        let payload = if batch {
            json!({
                "processed": results.len(),
                "failed": failed,
                "images": results,
            })
        } else {
            serde_json::to_value(&results[0])?
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for processed in &results {
            println!("{}", abs_path(&processed.target.physical).display());
        }
    }

    if batch {
        info!(processed = results.len(), failed, "batch finished");
    }
    if failed > 0 {
        bail!("{failed} of {} images failed", inputs.len());
    }
    Ok(())
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && is_image {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

fn write_sidecar(
    processed: &ProcessedImage,
    meta_out: Option<&Path>,
    config: &EngineConfig,
) -> Result<()> {
    let meta_path = meta_out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_sidecar_for(&processed.target.physical));

    let mut payload = serde_json::to_value(processed)?;
    if let Value::Object(obj) = &mut payload {
        obj.insert("annotation_meta_version".to_string(), json!(1));
        obj.insert(
            "input_path".to_string(),
            json!(abs_path(&processed.input).display().to_string()),
        );
        obj.insert(
            "output_path".to_string(),
            json!(abs_path(&processed.target.physical).display().to_string()),
        );
        obj.insert(
            "meta_path".to_string(),
            json!(abs_path(&meta_path).display().to_string()),
        );
        obj.insert("generated_at".to_string(), json!(Utc::now().to_rfc3339()));
        obj.insert("language".to_string(), json!(config.language));
        obj.insert("alignment".to_string(), json!(config.alignment));
    }
    write_json_pretty(&meta_path, &payload)
}

fn command_report(args: ReportArgs) -> Result<()> {
    let context = ReportContext {
        robot: args.robot,
        camera: args.camera,
    };
    let now = Local::now().naive_local();

    let mut payloads = Vec::new();
    for path in &args.meta {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read sidecar: {}", path.display()))?;
        let sidecar: SidecarView = serde_json::from_str(&raw)
            .with_context(|| format!("invalid sidecar JSON: {}", path.display()))?;
        payloads.extend(build_payloads(
            &sidecar.labels,
            &[sidecar.target.logical],
            &sidecar.ai_text,
            now,
            &context,
        ));
    }

    println!("{}", serde_json::to_string_pretty(&payloads)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cli_flags_override_config_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("engine.json");
        fs::write(&config_path, r#"{"language": "zh", "alignment": "right"}"#).unwrap();
        let cli = Cli::try_parse_from([
            "surveil-overlay",
            "parse",
            "--text",
            "-",
            "--config",
            config_path.to_str().unwrap(),
            "--align",
            "left",
            "--max-chars",
            "12",
        ])
        .unwrap();
        let Commands::Parse(args) = cli.command else {
            panic!("expected parse command");
        };
        let config = resolve_config(&args.engine).unwrap();
        assert_eq!(config.language, Language::Zh);
        assert_eq!(config.alignment, Alignment::Left);
        assert_eq!(config.max_chars, Some(12));
        assert!(!config.detection_boxes);
    }

    #[test]
    fn list_images_filters_and_sorts() {
        let dir = tempdir().unwrap();
        for name in ["b.JPG", "a.png", "notes.txt", "c.bmp"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let names: Vec<String> = list_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.png", "b.JPG", "c.bmp"]);
    }

    #[test]
    fn sidecar_feeds_report() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("frame.png");
        image::RgbaImage::from_pixel(800, 600, image::Rgba([40, 40, 40, 255]))
            .save(&input)
            .unwrap();
        let observations = dir.path().join("obs.txt");
        fs::write(&observations, "Wet floor, yes\nCable on ground, no\n").unwrap();
        let detections = dir.path().join("det.json");
        fs::write(&detections, r#"[{"label": "water puddle", "bbox_2d": [1, 2, 3, 4]}]"#).unwrap();

        let config = EngineConfig::default();
        let engine = AnnotationEngine::from_config(&config).unwrap();
        let model = ScriptedModel::from_files(&observations, Some(&detections), None).unwrap();
        let target = OutputTarget::explicit(&dir.path().join("out").join("frame_annotated.png"));
        let processed = engine.process_image(&input, &target, &model).unwrap();
        write_sidecar(&processed, None, &config).unwrap();

        let meta_path = dir.path().join("out").join("frame_annotated.json");
        let sidecar: SidecarView =
            serde_json::from_str(&fs::read_to_string(&meta_path).unwrap()).unwrap();
        assert_eq!(sidecar.labels.iter().collect::<Vec<_>>(), vec!["water puddle"]);
        assert!(sidecar.ai_text.contains("please address promptly"));
        assert_eq!(sidecar.target.logical, target.logical);
    }

    #[test]
    fn batch_counts_sidecar_failures_and_continues() {
        let dir = tempdir().unwrap();
        let frames = dir.path().join("frames");
        fs::create_dir_all(&frames).unwrap();
        for name in ["a.png", "b.png"] {
            image::RgbaImage::from_pixel(400, 300, image::Rgba([40, 40, 40, 255]))
                .save(frames.join(name))
                .unwrap();
        }
        let observations = dir.path().join("obs.txt");
        fs::write(&observations, "Cable on ground, no\n").unwrap();
        let out = dir.path().join("out");
        // a directory where a's sidecar should go makes that write fail
        fs::create_dir_all(out.join("a_annotated.json")).unwrap();

        let cli = Cli::try_parse_from([
            "surveil-overlay",
            "annotate",
            frames.to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
            "--observations",
            observations.to_str().unwrap(),
        ])
        .unwrap();
        let Commands::Annotate(args) = cli.command else {
            panic!("expected annotate command");
        };
        let err = command_annotate(args).unwrap_err();
        assert!(err.to_string().contains("1 of 2 images failed"), "{err:#}");
        assert!(out.join("b_annotated.png").exists());
        assert!(out.join("b_annotated.json").is_file());
    }
}
