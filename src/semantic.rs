use std::fs;
use std::path::{Path, PathBuf};

use image::GenericImageView;
use ort::session::Session;
use ort::value::Tensor;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::DeepSeeError;

/// Detections below this confidence are discarded at the ONNX boundary.
const MIN_CONFIDENCE: f32 = 0.25;

#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub label: String,
    pub score: f32,
    pub bbox: [f32; 4],
}

/// Forensic signal extracted upstream of calibration. Defaults mean
/// "no signal": no EXIF, zero error-level and edge scores.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeatureSet {
    pub has_exif: bool,
    pub ela_score: f64,
    pub edge_score: f64,
}

/// Baseline similarity distances. `None` means missing or malformed; every
/// consumer treats `None` as "skip the adjustment" rather than an error.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DistanceSet {
    pub human_distance: Option<f64>,
    pub ai_distance: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SemanticResult {
    pub objects: Vec<Detection>,
    pub faces: Vec<Detection>,
    pub hands: Vec<Detection>,
    pub ears: Vec<Detection>,
    pub buildings: Vec<Detection>,
    pub anomaly_flags: Vec<String>,
    pub scene_consistency: String,
    pub features: Option<FeatureSet>,
    pub distances: Option<DistanceSet>,
}

impl SemanticResult {
    /// Well-defined degraded result for when no detector backend is
    /// available. Detection unavailability is not fatal.
    pub fn placeholder() -> Self {
        Self {
            objects: Vec::new(),
            faces: Vec::new(),
            hands: Vec::new(),
            ears: Vec::new(),
            buildings: Vec::new(),
            anomaly_flags: Vec::new(),
            scene_consistency: "unknown".to_string(),
            features: None,
            distances: None,
        }
    }

    /// One-line JSON summary for the custody trail.
    pub fn summary(&self) -> String {
        serde_json::json!({
            "objects": self.objects.len(),
            "faces": self.faces.len(),
            "hands": self.hands.len(),
            "ears": self.ears.len(),
            "buildings": self.buildings.len(),
            "anomalies": self.anomaly_flags,
            "scene_consistency": self.scene_consistency,
        })
        .to_string()
    }
}

/// Group raw detections into semantic buckets and derive anomaly flags.
///
/// Heuristics: low-confidence hands and face crowds are anomalies; more than
/// two buildings reads as an inconsistent scene.
pub fn group_detections(
    objects: Vec<Detection>,
    features: Option<FeatureSet>,
    distances: Option<DistanceSet>,
) -> SemanticResult {
    let mut faces = Vec::new();
    let mut hands = Vec::new();
    let mut ears = Vec::new();
    let mut buildings = Vec::new();

    for obj in &objects {
        let label = obj.label.to_lowercase();
        if label.contains("person") {
            faces.push(obj.clone());
        }
        if label.contains("hand") {
            hands.push(obj.clone());
        }
        if label.contains("ear") {
            ears.push(obj.clone());
        }
        if label.contains("building") || label.contains("house") {
            buildings.push(obj.clone());
        }
    }

    let mut anomaly_flags = Vec::new();
    if !hands.is_empty() && hands.iter().any(|h| h.score < 0.3) {
        anomaly_flags.push("hand_anomaly".to_string());
    }
    if faces.len() > 5 {
        anomaly_flags.push("too_many_faces".to_string());
    }

    let scene_consistency = if buildings.len() <= 2 {
        "consistent".to_string()
    } else {
        "inconsistent".to_string()
    };

    SemanticResult {
        objects,
        faces,
        hands,
        ears,
        buildings,
        anomaly_flags,
        scene_consistency,
        features,
        distances,
    }
}

/// Object-detection boundary. Backends return structured detections for one
/// image; anything that cannot provide them should not be constructed in the
/// first place (callers fall back to the placeholder result).
pub trait Detector {
    fn detect(&mut self, image_path: &Path) -> Result<SemanticResult, DeepSeeError>;
}

/// Detector fed from a JSON file produced by an external tool. Accepts a
/// top-level object with `objects` (list of {label, score, bbox}) and
/// optional `features` / `distances` objects. Malformed numeric distances
/// become `None`, never errors.
pub struct JsonDetector {
    path: PathBuf,
}

impl JsonDetector {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Detector for JsonDetector {
    fn detect(&mut self, _image_path: &Path) -> Result<SemanticResult, DeepSeeError> {
        if !self.path.exists() {
            return Err(DeepSeeError::NotFound(self.path.clone()));
        }
        let raw = fs::read_to_string(&self.path)?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| DeepSeeError::Inference(format!("detector JSON: {e}")))?;
        Ok(semantic_from_json(&value))
    }
}

pub fn semantic_from_json(value: &Value) -> SemanticResult {
    let objects = value
        .get("objects")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_detection).collect())
        .unwrap_or_default();

    let features = value.get("features").map(|f| FeatureSet {
        has_exif: parse_flag(f.get("has_exif")),
        ela_score: parse_number(f.get("ela_score")).unwrap_or(0.0),
        edge_score: parse_number(f.get("edge_score")).unwrap_or(0.0),
    });

    let distances = value.get("distances").map(|d| DistanceSet {
        human_distance: parse_number(d.get("human_distance")),
        ai_distance: parse_number(d.get("ai_distance")),
    });

    group_detections(objects, features, distances)
}

fn parse_detection(value: &Value) -> Option<Detection> {
    let label = value.get("label")?.as_str()?.to_string();
    let score = value.get("score")?.as_f64()? as f32;
    let mut bbox = [0.0f32; 4];
    if let Some(raw) = value.get("bbox").and_then(Value::as_array) {
        for (slot, v) in bbox.iter_mut().zip(raw) {
            *slot = v.as_f64().unwrap_or(0.0) as f32;
        }
    }
    Some(Detection { label, score, bbox })
}

/// Lenient numeric parse: numbers pass through, numeric strings are parsed,
/// everything else is `None` (the caller skips that signal).
fn parse_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64() == Some(1.0),
        _ => false,
    }
}

/// ONNX-backed detector. Expects a post-NMS model emitting rows of
/// `[x1, y1, x2, y2, score, class_id]` over a 640x640 input. Class names
/// come from a `<model_stem>.labels` file next to the model when present,
/// otherwise detections are labelled `class_<id>`.
pub struct OnnxDetector {
    session: Session,
    labels: Vec<String>,
}

impl OnnxDetector {
    pub fn load(model_path: &Path) -> Result<Self, DeepSeeError> {
        if !model_path.exists() {
            return Err(DeepSeeError::NotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()
            .map_err(|e| DeepSeeError::Inference(e.to_string()))?
            .with_intra_threads(1)
            .map_err(|e| DeepSeeError::Inference(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| DeepSeeError::Inference(e.to_string()))?;

        let labels = load_labels(model_path);
        debug!(model = %model_path.display(), classes = labels.len(), "detector loaded");

        Ok(Self { session, labels })
    }

    fn label_for(labels: &[String], class_id: usize) -> String {
        labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }
}

impl Detector for OnnxDetector {
    fn detect(&mut self, image_path: &Path) -> Result<SemanticResult, DeepSeeError> {
        if !image_path.exists() {
            return Err(DeepSeeError::NotFound(image_path.to_path_buf()));
        }

        let img = image::open(image_path)
            .map_err(|e| DeepSeeError::ImageDecode(e.to_string()))?;
        let resized = img.resize_exact(640, 640, image::imageops::FilterType::Triangle);

        let mut input = vec![0.0f32; 3 * 640 * 640];
        for (x, y, pixel) in resized.pixels() {
            let (x, y) = (x as usize, y as usize);
            input[y * 640 + x] = pixel[0] as f32 / 255.0;
            input[640 * 640 + y * 640 + x] = pixel[1] as f32 / 255.0;
            input[2 * 640 * 640 + y * 640 + x] = pixel[2] as f32 / 255.0;
        }

        let tensor = Tensor::from_array((vec![1i64, 3, 640, 640], input))
            .map_err(|e| DeepSeeError::Inference(e.to_string()))?;

        let Self { session, labels } = self;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| DeepSeeError::Inference(e.to_string()))?;

        let (_name, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| DeepSeeError::Inference("detector produced no output".into()))?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| DeepSeeError::Inference(e.to_string()))?;

        // Accept [N, 6] or [1, N, 6].
        let cols = *shape.last().unwrap_or(&0) as usize;
        if cols != 6 {
            warn!(?shape, "unexpected detector output shape, no detections kept");
            return Ok(SemanticResult::placeholder());
        }

        let mut objects = Vec::new();
        for row in data.chunks_exact(cols) {
            let score = row[4];
            if score < MIN_CONFIDENCE {
                continue;
            }
            objects.push(Detection {
                label: Self::label_for(labels, row[5] as usize),
                score,
                bbox: [row[0], row[1], row[2], row[3]],
            });
        }

        Ok(group_detections(objects, None, None))
    }
}

fn load_labels(model_path: &Path) -> Vec<String> {
    let labels_path = model_path.with_extension("labels");
    match fs::read_to_string(&labels_path) {
        Ok(raw) => raw.lines().map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &str, score: f32) -> Detection {
        Detection { label: label.to_string(), score, bbox: [0.0; 4] }
    }

    #[test]
    fn placeholder_is_empty_and_unknown() {
        let s = SemanticResult::placeholder();
        assert!(s.objects.is_empty());
        assert!(s.anomaly_flags.is_empty());
        assert_eq!(s.scene_consistency, "unknown");
        assert!(s.features.is_none());
        assert!(s.distances.is_none());
    }

    #[test]
    fn grouping_buckets_by_label_substring() {
        let s = group_detections(
            vec![det("person", 0.9), det("hand", 0.8), det("house", 0.7), det("dog", 0.6)],
            None,
            None,
        );
        assert_eq!(s.objects.len(), 4);
        assert_eq!(s.faces.len(), 1);
        assert_eq!(s.hands.len(), 1);
        assert_eq!(s.buildings.len(), 1);
        assert!(s.ears.is_empty());
    }

    #[test]
    fn low_confidence_hand_raises_anomaly() {
        let s = group_detections(vec![det("hand", 0.2)], None, None);
        assert_eq!(s.anomaly_flags, vec!["hand_anomaly"]);
    }

    #[test]
    fn confident_hands_are_not_anomalous() {
        let s = group_detections(vec![det("hand", 0.8), det("hand", 0.31)], None, None);
        assert!(s.anomaly_flags.is_empty());
    }

    #[test]
    fn face_crowd_raises_anomaly() {
        let faces: Vec<_> = (0..6).map(|_| det("person", 0.9)).collect();
        let s = group_detections(faces, None, None);
        assert_eq!(s.anomaly_flags, vec!["too_many_faces"]);
    }

    #[test]
    fn building_count_drives_scene_consistency() {
        let s = group_detections(vec![det("building", 0.9); 2], None, None);
        assert_eq!(s.scene_consistency, "consistent");

        let s = group_detections(vec![det("building", 0.9); 3], None, None);
        assert_eq!(s.scene_consistency, "inconsistent");
    }

    #[test]
    fn json_boundary_parses_structured_payload() {
        let value: Value = serde_json::from_str(
            r#"{
                "objects": [
                    {"label": "person", "score": 0.92, "bbox": [1.0, 2.0, 3.0, 4.0]},
                    {"label": 7, "score": 0.5}
                ],
                "features": {"has_exif": 1, "ela_score": 0.3, "edge_score": 0.5},
                "distances": {"human_distance": 0.4, "ai_distance": "oops"}
            }"#,
        )
        .unwrap();

        let s = semantic_from_json(&value);
        // The malformed second object is dropped, not fatal.
        assert_eq!(s.objects.len(), 1);
        assert_eq!(s.faces.len(), 1);

        let feats = s.features.unwrap();
        assert!(feats.has_exif);
        assert!((feats.ela_score - 0.3).abs() < 1e-9);

        let dists = s.distances.unwrap();
        assert_eq!(dists.human_distance, Some(0.4));
        assert_eq!(dists.ai_distance, None);
    }

    #[test]
    fn json_boundary_parses_numeric_strings() {
        let value: Value =
            serde_json::from_str(r#"{"distances": {"human_distance": " 0.25 "}}"#).unwrap();
        let s = semantic_from_json(&value);
        assert_eq!(s.distances.unwrap().human_distance, Some(0.25));
    }

    #[test]
    fn missing_sidecar_file_is_not_found() {
        let mut d = JsonDetector::new(PathBuf::from("/no/such/sidecar.json"));
        let err = d.detect(Path::new("/irrelevant.png")).unwrap_err();
        assert!(matches!(err, DeepSeeError::NotFound(_)));
    }
}
