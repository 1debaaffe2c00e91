use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::DynamicImage;
use serde::Deserialize;
use tracing::{debug, info};

use crate::decode::{decode_output, Candidate, RawOutput};
use crate::error::{DetectError, Result};
use crate::nms::postprocess;
use crate::preprocess::{ensure_pixels, to_tensor, ChannelOrder, Tensor};
use crate::{BackendAvailability, BackendIdentity, Detection, DetectionParams, LabelMap, Rect};

/// An interchangeable detection strategy.
///
/// `availability` must stay cheap: it may probe for a resource but never load it.
/// `detect` does not trust an earlier probe and re-checks on its own.
pub trait DetectorBackend: Send + Sync {
    fn identity(&self) -> BackendIdentity;

    fn availability(&self) -> BackendAvailability;

    fn detect(&self, image: &DynamicImage, params: &DetectionParams) -> Result<Vec<Detection>>;
}

/// Opaque inference engine able to open a model file.
pub trait InferenceRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    fn load(&self, model_path: &Path, input_size: u32) -> anyhow::Result<Box<dyn InferenceSession>>;
}

/// A loaded model.
pub trait InferenceSession: Send {
    fn run(&mut self, input: &Tensor) -> anyhow::Result<RawOutput>;

    /// Human-readable tensor layout, for `inspect`.
    fn describe(&mut self) -> anyhow::Result<String> {
        Ok(String::from("(no layout information)"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSpec {
    pub model_path: PathBuf,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default)]
    pub channel_order: ChannelOrder,
    /// When set, output channel count is validated against it.
    #[serde(default)]
    pub num_classes: Option<usize>,
}

fn default_input_size() -> u32 {
    416
}

impl ModelSpec {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            input_size: default_input_size(),
            channel_order: ChannelOrder::default(),
            num_classes: None,
        }
    }
}

/// Learned-model backend: preprocess -> runtime -> decode -> suppress -> label.
///
/// Primary and secondary differ only in the runtime they are built with.
pub struct ModelBackend {
    identity: BackendIdentity,
    spec: ModelSpec,
    labels: LabelMap,
    runtime: Box<dyn InferenceRuntime>,
    session: Mutex<Option<Box<dyn InferenceSession>>>,
}

impl ModelBackend {
    pub fn new(
        identity: BackendIdentity,
        spec: ModelSpec,
        labels: LabelMap,
        runtime: Box<dyn InferenceRuntime>,
    ) -> Self {
        Self { identity, spec, labels, runtime, session: Mutex::new(None) }
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn model_present(&self) -> bool {
        self.spec.model_path.is_file()
    }

    fn unavailable(&self) -> DetectError {
        DetectError::ModelUnavailable {
            backend: self.identity,
            reason: format!("model not found at {}", self.spec.model_path.display()),
        }
    }

    /// Run `f` against the loaded session, loading it on first use.
    fn with_session<T>(
        &self,
        f: impl FnOnce(&mut dyn InferenceSession) -> anyhow::Result<T>,
    ) -> Result<T> {
        let mut guard = self.session.lock().map_err(|_| DetectError::InferenceFailed {
            backend: self.identity,
            detail: "session lock poisoned".into(),
        })?;

        if !self.model_present() {
            *guard = None;
            return Err(self.unavailable());
        }

        if guard.is_none() {
            let session = self
                .runtime
                .load(&self.spec.model_path, self.spec.input_size)
                .map_err(|e| DetectError::inference(self.identity, e))?;
            info!(
                "vision: loaded {} model via {}: {}",
                self.identity,
                self.runtime.name(),
                self.spec.model_path.display()
            );
            *guard = Some(session);
        }

        match guard.as_mut() {
            Some(session) => f(session.as_mut()).map_err(|e| DetectError::inference(self.identity, e)),
            None => Err(self.unavailable()),
        }
    }

    /// Loads the model if needed and reports its tensor layout.
    pub fn inspect(&self) -> Result<String> {
        self.with_session(|s| s.describe())
    }

    fn to_detection(&self, c: &Candidate) -> Detection {
        let size = self.spec.input_size as f32;
        let bbox = Rect::from_center(c.cx / size, c.cy / size, c.w / size, c.h / size).clamp01();
        Detection {
            label: self.labels.label(c.class_index()),
            confidence: c.confidence().clamp(0.0, 1.0),
            bbox,
        }
    }
}

impl DetectorBackend for ModelBackend {
    fn identity(&self) -> BackendIdentity {
        self.identity
    }

    fn availability(&self) -> BackendAvailability {
        if self.model_present() {
            BackendAvailability::ready(format!(
                "{} model at {}",
                self.runtime.name(),
                self.spec.model_path.display()
            ))
        } else {
            BackendAvailability::missing(format!(
                "model not found at {}",
                self.spec.model_path.display()
            ))
        }
    }

    fn detect(&self, image: &DynamicImage, params: &DetectionParams) -> Result<Vec<Detection>> {
        ensure_pixels(image)?;
        if !self.model_present() {
            return Err(self.unavailable());
        }
        let input = to_tensor(image, self.spec.input_size, self.spec.channel_order)?;
        let raw = self.with_session(|s| s.run(&input))?;
        let candidates = decode_output(&raw, self.spec.num_classes)?;
        let total = candidates.len();
        let kept = postprocess(candidates, params);
        debug!("{}: {} candidates -> {} after nms", self.identity, total, kept.len());
        Ok(kept.iter().map(|c| self.to_detection(c)).collect())
    }
}

/// Stand-in for a backend whose runtime was not compiled in or not configured.
pub struct DisabledBackend {
    identity: BackendIdentity,
    reason: String,
}

impl DisabledBackend {
    pub fn new(identity: BackendIdentity, reason: impl Into<String>) -> Self {
        Self { identity, reason: reason.into() }
    }
}

impl DetectorBackend for DisabledBackend {
    fn identity(&self) -> BackendIdentity {
        self.identity
    }

    fn availability(&self) -> BackendAvailability {
        BackendAvailability::missing(self.reason.clone())
    }

    fn detect(&self, _image: &DynamicImage, _params: &DetectionParams) -> Result<Vec<Detection>> {
        Err(DetectError::ModelUnavailable {
            backend: self.identity,
            reason: self.reason.clone(),
        })
    }
}
