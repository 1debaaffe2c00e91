use image::DynamicImage;
use tracing::{debug, info, warn};

use crate::error::{DetectError, Result};
use crate::{BackendAvailability, BackendIdentity, Detection, DetectionConfig, DetectorBackend};

/// The chosen backend plus at most one retry on the next one.
const MAX_ATTEMPTS: usize = 2;

/// Chooses among the three backends in fixed priority order and runs detection with
/// optional fallback.
///
/// Availability is probed on every call; nothing is cached between requests.
pub struct BackendSelector {
    primary: Box<dyn DetectorBackend>,
    secondary: Box<dyn DetectorBackend>,
    heuristic: Box<dyn DetectorBackend>,
}

impl BackendSelector {
    pub fn new(
        primary: Box<dyn DetectorBackend>,
        secondary: Box<dyn DetectorBackend>,
        heuristic: Box<dyn DetectorBackend>,
    ) -> Self {
        Self { primary, secondary, heuristic }
    }

    pub fn backend(&self, identity: BackendIdentity) -> &dyn DetectorBackend {
        match identity {
            BackendIdentity::Primary => self.primary.as_ref(),
            BackendIdentity::Secondary => self.secondary.as_ref(),
            BackendIdentity::Heuristic => self.heuristic.as_ref(),
        }
    }

    /// Live availability of every backend, in priority order, regardless of config.
    pub fn availability(&self) -> Vec<(BackendIdentity, BackendAvailability)> {
        BackendIdentity::PRIORITY
            .iter()
            .map(|&id| (id, self.backend(id).availability()))
            .collect()
    }

    /// Enabled backends that currently report available, plus the failure recorded for the
    /// last enabled one that did not.
    fn ready(&self, cfg: &DetectionConfig) -> Result<(Vec<&dyn DetectorBackend>, Option<DetectError>)> {
        let mut ready = Vec::new();
        let mut last_err = None;
        let mut enabled = 0;

        for id in BackendIdentity::PRIORITY {
            if !cfg.enables(id) {
                continue;
            }
            enabled += 1;
            let backend = self.backend(id);
            let status = backend.availability();
            if status.available {
                ready.push(backend);
            } else {
                debug!("selector: {} unavailable: {}", id, status.status);
                last_err = Some(DetectError::ModelUnavailable { backend: id, reason: status.status });
            }
        }

        if enabled == 0 {
            return Err(DetectError::InvalidConfig("no detection backend enabled".into()));
        }
        Ok((ready, last_err))
    }

    /// Pick the backend that would serve a request under `cfg`.
    ///
    /// With fallback disabled this is the first enabled backend, and it is an error for it
    /// to be unavailable. With fallback enabled, unavailable backends are skipped.
    pub fn select(&self, cfg: &DetectionConfig) -> Result<&dyn DetectorBackend> {
        if !cfg.fallback_enabled {
            let id = BackendIdentity::PRIORITY
                .into_iter()
                .find(|&id| cfg.enables(id))
                .ok_or_else(|| DetectError::InvalidConfig("no detection backend enabled".into()))?;
            let backend = self.backend(id);
            let status = backend.availability();
            if !status.available {
                return Err(DetectError::ModelUnavailable { backend: id, reason: status.status });
            }
            debug!("selector: using {} (fallback disabled)", id);
            return Ok(backend);
        }

        let (ready, last_err) = self.ready(cfg)?;
        match ready.into_iter().next() {
            Some(backend) => {
                debug!("selector: using {}", backend.identity());
                Ok(backend)
            }
            None => Err(last_err.unwrap_or_else(|| DetectError::InvalidConfig("no detection backend enabled".into()))),
        }
    }

    /// Run detection, returning the detections and the backend that produced them.
    ///
    /// Without fallback, a failure of the selected backend is returned unchanged. With
    /// fallback, a recoverable failure is retried once on the next available backend; when
    /// everything is exhausted the last failure is returned.
    pub fn detect_with_fallback(
        &self,
        image: &DynamicImage,
        cfg: &DetectionConfig,
    ) -> Result<(Vec<Detection>, BackendIdentity)> {
        let params = cfg.params()?;

        if !cfg.fallback_enabled {
            let backend = self.select(cfg)?;
            let detections = backend.detect(image, &params)?;
            return Ok((detections, backend.identity()));
        }

        let (ready, mut last_err) = self.ready(cfg)?;
        for (attempt, backend) in ready.into_iter().take(MAX_ATTEMPTS).enumerate() {
            let id = backend.identity();
            match backend.detect(image, &params) {
                Ok(detections) => {
                    if attempt > 0 {
                        info!("selector: served by fallback backend {}", id);
                    }
                    return Ok((detections, id));
                }
                Err(e) if e.is_recoverable() => {
                    warn!("selector: {} failed, trying next backend: {}", id, e);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| DetectError::InvalidConfig("no detection backend enabled".into())))
    }
}
