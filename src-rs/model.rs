use crate::config::DetectorFormat;
use crate::engine::ObservationModel;
use crate::language::Language;
use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;
use wait_timeout::ChildExt;

pub const DEFAULT_DETECTION_OBJECTS: [&str; 5] = [
    "plastic bag",
    "plastic bottle",
    "cardboard",
    "water puddle",
    "smoker",
];

/// Prompt texts for the three model calls. `{description}` in `suggest` is
/// replaced by the observation being addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub observe: String,
    pub detect: String,
    pub suggest: String,
}

impl Prompts {
    pub fn for_language(language: Language, detector_format: DetectorFormat, objects: &[&str]) -> Self {
        let objects = objects.join(", ");
        match language {
            Language::En => Self {
                observe: "You are a security guard reviewing this image. Report whether any visible gate is \
                          closed, then two more distinct security-relevant observations. Output one line per \
                          observation, exactly: <observation>, <yes|no> where yes means it needs immediate \
                          handling. No numbering, no explanation."
                    .to_string(),
                detect: match detector_format {
                    DetectorFormat::Json => format!(
                        "Locate the object: {objects}. Answer with a JSON array of \
                         {{\"label\": string, \"bbox_2d\": [x0, y0, x1, y1]}} on a 0-1000 scale."
                    ),
                    DetectorFormat::Answers => format!(
                        "Are there {objects} in the photo? Answer one line per object: <object>, <yes|no>"
                    ),
                },
                suggest: "Give precaution actions for the problem {description}. Respond in minimal point \
                          form, one suggestion point of no more than 5 words."
                    .to_string(),
            },
            Language::Zh => Self {
                observe: "你是工廠的保安人員,正在檢查圖像。報告可見的門是否關閉,再提供兩個不同的安全相關觀察。\
                          每行一個觀察,格式為:<觀察>, <是|否>,是表示需要立即處理。不要編號,不要解釋。"
                    .to_string(),
                detect: match detector_format {
                    DetectorFormat::Json => format!(
                        "找出以下物件:{objects}。以JSON陣列回答,每項為 \
                         {{\"label\": 字串, \"bbox_2d\": [x0, y0, x1, y1]}},座標範圍0-1000。"
                    ),
                    DetectorFormat::Answers => {
                        format!("照片中是否有{objects}?每個物件一行回答:<物件>, <是|否>")
                    }
                },
                suggest: "針對問題 {description} 給出預防措施建議,以最簡短的要點形式回答,只給出1條建議,不超過20個字。"
                    .to_string(),
            },
        }
    }

    pub fn suggestion_for(&self, description: &str) -> String {
        self.suggest.replace("{description}", description)
    }
}

/// Runs an external command once per model call: the prompt goes to stdin,
/// the image path is passed as `--image <path>`, the reply is read from stdout.
#[derive(Debug, Clone)]
pub struct CommandModel {
    program: String,
    args: Vec<String>,
    prompts: Prompts,
    timeout: Duration,
}

impl CommandModel {
    /// `command_line` is split on whitespace; the first word is the program.
    pub fn new(command_line: &str, prompts: Prompts, timeout_sec: u64) -> Result<Self> {
        let mut words = command_line.split_whitespace().map(ToString::to_string);
        let program = words
            .next()
            .ok_or_else(|| anyhow!("model command is empty"))?;
        Ok(Self {
            program,
            args: words.collect(),
            prompts,
            timeout: Duration::from_secs(timeout_sec.max(1)),
        })
    }

    fn run(&self, prompt: &str, image: &Path) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg("--image").arg(image);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to start model command: {}", self.program))?;
        // Pipes are drained while waiting so a chatty child cannot fill them
        // and stall until the timeout.
        let stdout_reader = child.stdout.take().map(drain_pipe);
        let stderr_reader = child.stderr.take().map(drain_pipe);
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .context("failed to send prompt to model command")?;
        }

        let status = match child.wait_timeout(self.timeout).map_err(anyhow::Error::from)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                bail!(
                    "model command timed out after {}s: {}",
                    self.timeout.as_secs(),
                    self.program
                );
            }
        };

        let stdout = collect_pipe(stdout_reader).context("failed to read model command output")?;
        let stderr = collect_pipe(stderr_reader).context("failed to read model command stderr")?;
        let stdout = String::from_utf8_lossy(&stdout).to_string();
        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            bail!(
                "model command exited with {}: {}",
                status.code().unwrap_or(1),
                truncate_text(stderr.trim(), 400)
            );
        }
        debug!(program = %self.program, bytes = stdout.len(), "model reply");
        Ok(stdout)
    }
}

impl ObservationModel for CommandModel {
    fn observe(&self, image: &Path) -> Result<String> {
        self.run(&self.prompts.observe, image)
    }

    fn detect(&self, image: &Path) -> Result<String> {
        self.run(&self.prompts.detect, image)
    }

    fn suggest(&self, image: &Path, description: &str) -> Result<String> {
        self.run(&self.prompts.suggestion_for(description), image)
    }
}

/// Canned replies read from files, the same for every image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptedModel {
    pub observation: String,
    pub detection: String,
    pub suggestions: Suggestions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Suggestions {
    #[default]
    None,
    /// One reply used for every actionable record.
    Shared(String),
    /// Replies keyed by observation description.
    ByDescription(HashMap<String, String>),
}

impl Suggestions {
    /// A JSON object maps descriptions to replies; any other text is shared.
    pub fn from_text(raw: &str) -> Self {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
            let replies = map
                .into_iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.trim().to_string(), s.to_string())))
                .collect();
            return Suggestions::ByDescription(replies);
        }
        Suggestions::Shared(raw.to_string())
    }
}

impl ScriptedModel {
    pub fn from_files(
        observations: &Path,
        detections: Option<&Path>,
        suggestions: Option<&Path>,
    ) -> Result<Self> {
        let observation = read_text(observations)?;
        let detection = match detections {
            Some(path) => read_text(path)?,
            None => String::new(),
        };
        let suggestions = match suggestions {
            Some(path) => Suggestions::from_text(&read_text(path)?),
            None => Suggestions::None,
        };
        Ok(Self {
            observation,
            detection,
            suggestions,
        })
    }
}

impl ObservationModel for ScriptedModel {
    fn observe(&self, _image: &Path) -> Result<String> {
        Ok(self.observation.clone())
    }

    fn detect(&self, _image: &Path) -> Result<String> {
        Ok(self.detection.clone())
    }

    fn suggest(&self, _image: &Path, description: &str) -> Result<String> {
        match &self.suggestions {
            Suggestions::None => bail!("no scripted suggestions"),
            Suggestions::Shared(reply) => Ok(reply.clone()),
            Suggestions::ByDescription(replies) => replies
                .get(description.trim())
                .cloned()
                .ok_or_else(|| anyhow!("no scripted suggestion for: {description}")),
        }
    }
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read model text: {}", path.display()))
}

fn drain_pipe<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn collect_pipe(reader: Option<JoinHandle<io::Result<Vec<u8>>>>) -> Result<Vec<u8>> {
    match reader {
        Some(handle) => handle
            .join()
            .map_err(|_| anyhow!("pipe reader thread panicked"))?
            .map_err(anyhow::Error::from),
        None => Ok(Vec::new()),
    }
}

fn truncate_text(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect::<String>() + "...<truncated>"
}
