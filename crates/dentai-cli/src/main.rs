use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use dentai_proto::report::{BackendStatusRecord, DetectionRecord, DetectionReport, MetricsRecord, ServedBy};
use dentai_vision::backend::InferenceRuntime;
use dentai_vision::heuristic::{HeuristicBackend, HeuristicTuning};
use dentai_vision::preprocess::ChannelOrder;
use dentai_vision::{
    BackendIdentity, BackendSelector, DetectionConfig, DetectionService, DetectorBackend, DisabledBackend,
    LabelMap, MetricsCollector, MetricsConfig, ModelBackend, ModelSpec,
};

#[cfg(feature = "vision-tflite")]
use dentai_vision::tflite::TfliteRuntime;
#[cfg(feature = "backend-tract")]
use dentai_vision::tract::TractRuntime;

#[derive(Debug, Parser)]
#[command(name = "dentai", version, about = "DentAI - on-device dental condition detection")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run detection over one or more image files and print one JSON report per image.
    Detect {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        #[arg(long, default_value_t = 2)]
        concurrency: usize,
    },
    /// Report which backends are enabled and available.
    Probe,
    /// Load a model and print its tensor layout.
    Inspect {
        #[arg(long)]
        secondary: bool,
    },
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct Config {
    detection: DetectionConfig,
    models: ModelsCfg,
    heuristic: HeuristicTuning,
    metrics: MetricsConfig,
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct ModelsCfg {
    input_size: u32,
    channel_order: ChannelOrder,
    num_classes: Option<usize>,
    labels: Vec<String>,
    labels_path: Option<PathBuf>,

    primary_model_path: Option<PathBuf>,
    primary_model_path_edgetpu: Option<PathBuf>,
    use_coral: bool,
    tflite_threads: i32,

    secondary_model_path: Option<PathBuf>,
}

impl Default for ModelsCfg {
    fn default() -> Self {
        Self {
            input_size: 416,
            channel_order: ChannelOrder::Rgb,
            num_classes: None,
            labels: Vec::new(),
            labels_path: None,
            primary_model_path: None,
            primary_model_path_edgetpu: None,
            use_coral: false,
            tflite_threads: 2,
            secondary_model_path: None,
        }
    }
}

impl ModelsCfg {
    fn spec(&self, model_path: &Path) -> ModelSpec {
        ModelSpec {
            model_path: model_path.to_path_buf(),
            input_size: self.input_size,
            channel_order: self.channel_order,
            num_classes: self.num_classes,
        }
    }

    fn model_path(&self, identity: BackendIdentity) -> Option<&PathBuf> {
        match identity {
            BackendIdentity::Primary if self.use_coral => self
                .primary_model_path_edgetpu
                .as_ref()
                .or(self.primary_model_path.as_ref()),
            BackendIdentity::Primary => self.primary_model_path.as_ref(),
            BackendIdentity::Secondary => self.secondary_model_path.as_ref(),
            BackendIdentity::Heuristic => None,
        }
    }
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

fn load_labels(models: &ModelsCfg) -> Result<LabelMap> {
    match &models.labels_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read labels file {}", path.display()))?;
            Ok(LabelMap::from_lines(&text))
        }
        None => Ok(LabelMap::new(models.labels.clone())),
    }
    .map(|labels| {
        if labels.is_empty() {
            warn!("no class labels configured; detections use class_<index> placeholders");
        }
        labels
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Detect { images, concurrency } => detect(&cfg, images, concurrency).await?,
        Command::Probe => probe(&cfg)?,
        Command::Inspect { secondary } => inspect(&cfg, secondary)?,
    }
    Ok(())
}

async fn detect(cfg: &Config, images: Vec<PathBuf>, concurrency: usize) -> Result<()> {
    cfg.detection.params().context("invalid [detection] section")?;
    let service = Arc::new(build_service(cfg)?);
    let detection = Arc::new(cfg.detection.clone());
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    info!("detect: {} images, concurrency {}", images.len(), concurrency.max(1));

    let mut handles = Vec::with_capacity(images.len());
    for path in images {
        let permit = permits.clone().acquire_owned().await?;
        let service = service.clone();
        let detection = detection.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            detect_one(&service, &path, &detection)
        }));
    }

    for handle in handles {
        let report = handle.await.context("detection worker panicked")?;
        println!("{}", serde_json::to_string(&report)?);
    }

    let snap = service.metrics().snapshot();
    let record = MetricsRecord {
        ts_unix_ms: now_unix_ms(),
        count: snap.count,
        p50_latency_ms: snap.p50_latency_ms,
        p95_latency_ms: snap.p95_latency_ms,
        avg_confidence: snap.avg_confidence,
    };
    println!("{}", serde_json::to_string(&record)?);
    Ok(())
}

fn detect_one(service: &DetectionService, path: &Path, cfg: &DetectionConfig) -> DetectionReport {
    let mut report = DetectionReport {
        ts_unix_ms: now_unix_ms(),
        image: path.display().to_string(),
        served_by: None,
        latency_ms: None,
        detections: Vec::new(),
        error: None,
    };

    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            warn!("detect: cannot read {}: {}", path.display(), e);
            report.error = Some(format!("read image: {}", e));
            return report;
        }
    };

    match service.detect_encoded(&bytes, cfg) {
        Ok(outcome) => {
            report.served_by = Some(served_by(outcome.served_by));
            report.latency_ms = Some(outcome.latency_ms);
            report.detections = outcome
                .detections
                .into_iter()
                .map(|d| DetectionRecord {
                    label: d.label,
                    confidence: d.confidence,
                    x: d.bbox.x,
                    y: d.bbox.y,
                    w: d.bbox.w,
                    h: d.bbox.h,
                })
                .collect();
        }
        Err(e) => {
            warn!("detect: {} failed: {}", path.display(), e);
            report.error = Some(e.to_string());
        }
    }
    report
}

fn probe(cfg: &Config) -> Result<()> {
    info!("probe: starting");
    if let Err(e) = cfg.detection.params() {
        warn!("probe: {}", e);
    }

    let service = build_service(cfg)?;
    for (identity, availability) in service.selector().availability() {
        let record = BackendStatusRecord {
            backend: served_by(identity),
            enabled: cfg.detection.enables(identity),
            available: availability.available,
            status: availability.status,
        };
        println!("{}", serde_json::to_string(&record)?);
    }

    match service.selector().select(&cfg.detection) {
        Ok(backend) => info!("probe: requests would be served by {}", backend.identity()),
        Err(e) => warn!("probe: no backend can serve requests: {}", e),
    }
    Ok(())
}

fn inspect(cfg: &Config, secondary: bool) -> Result<()> {
    let identity = if secondary { BackendIdentity::Secondary } else { BackendIdentity::Primary };
    let labels = load_labels(&cfg.models)?;
    let backend = model_backend(&cfg.models, &labels, identity).map_err(anyhow::Error::msg)?;
    let spec = backend.spec();
    println!(
        "{} model {} (input {}x{}, {:?}, {} labels)",
        identity,
        spec.model_path.display(),
        spec.input_size,
        spec.input_size,
        spec.channel_order,
        labels.len()
    );
    print!("{}", backend.inspect()?);
    Ok(())
}

fn build_service(cfg: &Config) -> Result<DetectionService> {
    let labels = load_labels(&cfg.models)?;
    let selector = BackendSelector::new(
        boxed_model_backend(&cfg.models, &labels, BackendIdentity::Primary),
        boxed_model_backend(&cfg.models, &labels, BackendIdentity::Secondary),
        Box::new(HeuristicBackend::new(cfg.heuristic.clone())),
    );
    Ok(DetectionService::new(selector, Arc::new(MetricsCollector::new(cfg.metrics))))
}

fn boxed_model_backend(models: &ModelsCfg, labels: &LabelMap, identity: BackendIdentity) -> Box<dyn DetectorBackend> {
    match model_backend(models, labels, identity) {
        Ok(b) => Box::new(b),
        Err(reason) => {
            info!("{} backend disabled: {}", identity, reason);
            Box::new(DisabledBackend::new(identity, reason))
        }
    }
}

/// `Err(reason)` when this binary or this config cannot provide the backend.
fn model_backend(
    models: &ModelsCfg,
    labels: &LabelMap,
    identity: BackendIdentity,
) -> std::result::Result<ModelBackend, String> {
    let runtime = match identity {
        BackendIdentity::Primary => tflite_runtime(models)?,
        BackendIdentity::Secondary => tract_runtime()?,
        BackendIdentity::Heuristic => return Err("heuristic backend has no model".into()),
    };
    let path = models
        .model_path(identity)
        .ok_or_else(|| format!("no model path configured for {} backend", identity))?;
    Ok(ModelBackend::new(identity, models.spec(path), labels.clone(), runtime))
}

#[cfg(feature = "vision-tflite")]
fn tflite_runtime(models: &ModelsCfg) -> std::result::Result<Box<dyn InferenceRuntime>, String> {
    Ok(Box::new(TfliteRuntime { num_threads: models.tflite_threads, use_coral: models.use_coral }))
}

#[cfg(not(feature = "vision-tflite"))]
fn tflite_runtime(_models: &ModelsCfg) -> std::result::Result<Box<dyn InferenceRuntime>, String> {
    Err("binary not built with --features vision-tflite".into())
}

#[cfg(feature = "backend-tract")]
fn tract_runtime() -> std::result::Result<Box<dyn InferenceRuntime>, String> {
    Ok(Box::new(TractRuntime))
}

#[cfg(not(feature = "backend-tract"))]
fn tract_runtime() -> std::result::Result<Box<dyn InferenceRuntime>, String> {
    Err("binary not built with --features backend-tract".into())
}

fn served_by(identity: BackendIdentity) -> ServedBy {
    match identity {
        BackendIdentity::Primary => ServedBy::Primary,
        BackendIdentity::Secondary => ServedBy::Secondary,
        BackendIdentity::Heuristic => ServedBy::Heuristic,
    }
}

fn now_unix_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_config_parses_to_defaults() {
        let cfg: Config = toml::from_str(include_str!("../../../config/dentai.example.toml")).unwrap();
        assert_eq!(cfg.detection, DetectionConfig::default());
        assert_eq!(cfg.heuristic, HeuristicTuning::default());
        assert_eq!(cfg.metrics, MetricsConfig::default());
        assert_eq!(cfg.models.labels.len(), 10);
        assert_eq!(cfg.models.num_classes, Some(10));
    }

    #[test]
    fn empty_config_still_serves_heuristic() {
        let cfg: Config = toml::from_str("").unwrap();
        let service = build_service(&cfg).unwrap();
        let backend = service.selector().select(&cfg.detection).unwrap();
        assert_eq!(backend.identity(), BackendIdentity::Heuristic);
    }

    #[test]
    fn labels_come_from_file_or_inline_list() {
        assert!(load_labels(&ModelsCfg::default()).unwrap().is_empty());

        let path = std::env::temp_dir().join(format!("dentai-cli-labels-{}.txt", std::process::id()));
        std::fs::write(&path, "caries\n\ncalculus\n").unwrap();
        let models = ModelsCfg { labels_path: Some(path.clone()), labels: vec!["ignored".into()], ..ModelsCfg::default() };
        let labels = load_labels(&models).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.label(1), "calculus");
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn partial_heuristic_table_parses() {
        let cfg: Config = toml::from_str("[heuristic.rectangle]\nmin_confidence = 0.6\n").unwrap();
        assert_eq!(cfg.heuristic.rectangle.min_confidence, 0.6);
        assert_eq!(cfg.heuristic.contour, HeuristicTuning::default().contour);
    }

    #[test]
    fn coral_prefers_edgetpu_model() {
        let models = ModelsCfg {
            primary_model_path: Some("cpu.tflite".into()),
            primary_model_path_edgetpu: Some("tpu.tflite".into()),
            use_coral: true,
            ..ModelsCfg::default()
        };
        assert_eq!(models.model_path(BackendIdentity::Primary), Some(&PathBuf::from("tpu.tflite")));
    }
}
