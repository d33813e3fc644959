use std::path::Path;

use tracing::{error, info};

use crate::calibrate::{calibrate, CalibrationResult};
use crate::classify::{build_feature_vector, Classifier};
use crate::database::CustodyStore;
use crate::error::DeepSeeError;
use crate::fingerprint::{self, Fingerprint};
use crate::media;
use crate::semantic::{Detector, SemanticResult};
use crate::verdict::{resolve, Verdict};

const ACTOR: &str = "pipeline";

/// Perceptual-hash distance at or below which two images count as
/// near-duplicates.
pub const NEAR_DUPLICATE_MAX_DISTANCE: u32 = 5;

#[derive(Debug)]
pub struct PipelineOutcome {
    pub verdict: Verdict,
    pub semantic: SemanticResult,
    pub calibration: CalibrationResult,
    pub fingerprint: Fingerprint,
    pub near_duplicate: bool,
}

/// Sequences one image through detection, classification, calibration, and
/// verdict resolution, recording every step in the custody trail.
///
/// Single-threaded and synchronous: one image start-to-finish per call.
pub struct Pipeline<'a> {
    store: &'a CustodyStore,
    classifier: Box<dyn Classifier>,
    detector: Option<Box<dyn Detector>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        store: &'a CustodyStore,
        classifier: Box<dyn Classifier>,
        detector: Option<Box<dyn Detector>>,
    ) -> Self {
        Self { store, classifier, detector }
    }

    /// Run the full pipeline. Collaborator failures are appended to the
    /// custody trail as `script_exit_error` and then re-propagated; nothing
    /// is retried or suppressed.
    pub fn run(&mut self, image_path: &Path) -> Result<PipelineOutcome, DeepSeeError> {
        match self.run_inner(image_path) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Annotation must not mask the original failure.
                if let Err(log_err) =
                    self.store.append(None, "script_exit_error", ACTOR, &e.to_string())
                {
                    error!("failed to record error event: {log_err}");
                }
                Err(e)
            }
        }
    }

    fn run_inner(&mut self, image_path: &Path) -> Result<PipelineOutcome, DeepSeeError> {
        let fp = fingerprint::fingerprint(image_path)?;
        let hash = fp.content_hash.as_str();

        // Checked before this image's own hash lands in the store, so a
        // first encounter never matches itself.
        let near_duplicate = self
            .store
            .is_near_duplicate(&fp.perceptual_hash, NEAR_DUPLICATE_MAX_DISTANCE)?;

        self.store
            .upsert_image(hash, &fp.perceptual_hash, &image_path.to_string_lossy())?;

        let mime = media::detect_mimetype(image_path)
            .unwrap_or_else(|_| "application/octet-stream".to_string());
        self.store.append(
            Some(hash),
            "pipeline_entry",
            ACTOR,
            &format!("{}:{}", image_path.display(), mime),
        )?;

        if near_duplicate {
            info!(hash, "near-duplicate of a stored image");
            self.store.append(
                Some(hash),
                "near_duplicate",
                ACTOR,
                &format!("perceptual hash {} within distance {}", fp.perceptual_hash, NEAR_DUPLICATE_MAX_DISTANCE),
            )?;
        }

        let semantic = match self.detector {
            Some(ref mut detector) => {
                let semantic = detector.detect(image_path)?;
                self.store
                    .append(Some(hash), "detect_objects", "detector", &semantic.summary())?;
                semantic
            }
            None => {
                self.store.append(
                    Some(hash),
                    "detect_objects_placeholder",
                    "detector",
                    "no detector backend configured",
                )?;
                SemanticResult::placeholder()
            }
        };

        let feats = semantic.features.clone().unwrap_or_default();
        let dists = semantic.distances.clone().unwrap_or_default();

        let features = build_feature_vector(&feats, &dists, &semantic);
        let prediction = self.classifier.predict(&features)?;
        self.store.append(
            Some(hash),
            "inference",
            "classifier",
            &format!("{}:{:.4}", prediction.top_label, prediction.top_score),
        )?;

        let calibration = calibrate(
            &prediction.labels,
            &prediction.probs,
            &feats,
            &dists,
            &semantic,
            self.store,
            Some(hash),
        )?;

        let verdict = resolve(&calibration, &feats, self.store, Some(hash))?;
        info!(%verdict, human = calibration.human, ai = calibration.ai_generated, "pipeline complete");

        Ok(PipelineOutcome { verdict, semantic, calibration, fingerprint: fp, near_duplicate })
    }
}
