use std::path::Path;

use ndarray::{Array, Array2};
use ort::session::Session;
use ort::value::Tensor;
use tracing::debug;

use crate::error::DeepSeeError;
use crate::semantic::{DistanceSet, FeatureSet, SemanticResult};

/// Class labels aligned with the classifier's output vector.
pub const LABELS: [&str; 2] = ["human", "ai_generated"];

/// Classifier input width: [has_exif, ela_score, edge_score, human_distance,
/// ai_distance, first_face_score, anomaly_count].
pub const FEATURE_DIM: usize = 7;

#[derive(Debug, Clone)]
pub struct Prediction {
    pub labels: Vec<String>,
    pub probs: Vec<f32>,
    pub top_label: String,
    pub top_score: f32,
}

/// Classifier boundary: fixed-size feature vector in, probability vector
/// aligned with [`LABELS`] out.
pub trait Classifier {
    fn predict(&mut self, features: &Array2<f32>) -> Result<Prediction, DeepSeeError>;
}

/// Flatten the structured forensic records into the model's input layout.
/// Missing distances contribute 0.0 here; their calibration adjustments are
/// gated separately.
pub fn build_feature_vector(
    feats: &FeatureSet,
    dists: &DistanceSet,
    semantic: &SemanticResult,
) -> Array2<f32> {
    let first_face_score = semantic.faces.first().map(|f| f.score).unwrap_or(0.0);

    Array::from_shape_vec(
        (1, FEATURE_DIM),
        vec![
            if feats.has_exif { 1.0 } else { 0.0 },
            feats.ela_score as f32,
            feats.edge_score as f32,
            dists.human_distance.unwrap_or(0.0) as f32,
            dists.ai_distance.unwrap_or(0.0) as f32,
            first_face_score,
            semantic.anomaly_flags.len() as f32,
        ],
    )
    .expect("shape (1, FEATURE_DIM) matches vec length")
}

#[derive(Debug)]
pub struct OnnxClassifier {
    session: Session,
}

impl OnnxClassifier {
    pub fn load(model_path: &Path) -> Result<Self, DeepSeeError> {
        if !model_path.exists() {
            return Err(DeepSeeError::NotFound(model_path.to_path_buf()));
        }

        let _ = ort::init().with_name("deepsee-inference").commit();

        let session = Session::builder()
            .map_err(|e| DeepSeeError::Inference(e.to_string()))?
            .with_intra_threads(1)
            .map_err(|e| DeepSeeError::Inference(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| DeepSeeError::Inference(e.to_string()))?;

        debug!(model = %model_path.display(), "classifier loaded");
        Ok(Self { session })
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&mut self, features: &Array2<f32>) -> Result<Prediction, DeepSeeError> {
        if features.shape() != [1, FEATURE_DIM] {
            return Err(DeepSeeError::ShapeMismatch {
                got: features.shape().iter().map(|&d| d as i64).collect(),
                expected: vec![1, FEATURE_DIM as i64],
            });
        }

        let tensor = Tensor::from_array((
            vec![1i64, FEATURE_DIM as i64],
            features.iter().copied().collect::<Vec<f32>>(),
        ))
        .map_err(|e| DeepSeeError::Inference(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| DeepSeeError::Inference(e.to_string()))?;

        let (_name, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| DeepSeeError::Inference("classifier produced no output".into()))?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| DeepSeeError::Inference(e.to_string()))?;

        if data.len() != LABELS.len() {
            return Err(DeepSeeError::ShapeMismatch {
                got: shape.iter().copied().collect(),
                expected: vec![1, LABELS.len() as i64],
            });
        }

        Ok(prediction_from_probs(data.to_vec()))
    }
}

fn prediction_from_probs(probs: Vec<f32>) -> Prediction {
    let top_idx = probs
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);

    Prediction {
        labels: LABELS.iter().map(|l| l.to_string()).collect(),
        top_label: LABELS[top_idx].to_string(),
        top_score: probs[top_idx],
        probs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::{group_detections, Detection};

    #[test]
    fn feature_vector_layout_matches_model_contract() {
        let feats = FeatureSet { has_exif: true, ela_score: 0.3, edge_score: 0.5 };
        let dists = DistanceSet { human_distance: Some(0.4), ai_distance: None };
        let semantic = group_detections(
            vec![Detection { label: "person".into(), score: 0.9, bbox: [0.0; 4] }],
            None,
            None,
        );

        let vec = build_feature_vector(&feats, &dists, &semantic);
        assert_eq!(vec.shape(), &[1, 7]);
        let row: Vec<f32> = vec.iter().copied().collect();
        assert_eq!(row, vec![1.0, 0.3, 0.5, 0.4, 0.0, 0.9, 0.0]);
    }

    #[test]
    fn feature_vector_defaults_to_zeroes() {
        let vec = build_feature_vector(
            &FeatureSet::default(),
            &DistanceSet::default(),
            &SemanticResult::placeholder(),
        );
        assert!(vec.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn top_label_follows_argmax() {
        let p = prediction_from_probs(vec![0.2, 0.8]);
        assert_eq!(p.top_label, "ai_generated");
        assert!((p.top_score - 0.8).abs() < 1e-6);

        let p = prediction_from_probs(vec![0.9, 0.1]);
        assert_eq!(p.top_label, "human");
    }

    #[test]
    fn missing_model_is_not_found() {
        let err = OnnxClassifier::load(Path::new("/no/model.onnx")).unwrap_err();
        assert!(matches!(err, DeepSeeError::NotFound(_)));
    }
}
