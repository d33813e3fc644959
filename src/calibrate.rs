use crate::database::CustodyStore;
use crate::error::DeepSeeError;
use crate::semantic::{DistanceSet, FeatureSet, SemanticResult};

const ACTOR: &str = "calibrate";

/// Normalized probability pair. Sums to 1.0 whenever any evidence mass is
/// present; an evidence-free input yields the uninformative 0.5/0.5 prior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationResult {
    pub human: f64,
    pub ai_generated: f64,
}

/// Fuse raw classifier probabilities with forensic features, baseline
/// distances, and semantic cues into a normalized human/AI pair, and record
/// the result in the custody trail.
///
/// Each adjustment is independently gated; a missing or malformed distance
/// skips its adjustment and is never an error.
pub fn calibrate(
    labels: &[String],
    probs: &[f32],
    feats: &FeatureSet,
    dists: &DistanceSet,
    semantic: &SemanticResult,
    store: &CustodyStore,
    content_hash: Option<&str>,
) -> Result<CalibrationResult, DeepSeeError> {
    let result = calibrated_probabilities(labels, probs, feats, dists, semantic);
    store.append(
        content_hash,
        "calibration",
        ACTOR,
        &format!("human={:.4}, ai_generated={:.4}", result.human, result.ai_generated),
    )?;
    Ok(result)
}

/// Pure fusion step, separated from the custody side effect for testing.
pub fn calibrated_probabilities(
    labels: &[String],
    probs: &[f32],
    feats: &FeatureSet,
    dists: &DistanceSet,
    semantic: &SemanticResult,
) -> CalibrationResult {
    let mut human_score = score_for(labels, probs, "human");
    let mut ai_score = score_for(labels, probs, "ai_generated");

    if feats.has_exif {
        human_score += 0.1;
    }
    if feats.ela_score > 0.5 {
        ai_score += 0.1;
    }
    if feats.edge_score < 0.2 {
        ai_score += 0.05;
    }
    if let Some(d) = dists.human_distance {
        if d < 0.5 {
            human_score += 0.05;
        }
    }
    if let Some(d) = dists.ai_distance {
        if d < 0.5 {
            ai_score += 0.05;
        }
    }
    if !semantic.faces.is_empty() {
        human_score += 0.05;
    }
    if !semantic.anomaly_flags.is_empty() {
        ai_score += 0.05;
    }

    let total = human_score + ai_score;
    if total <= 0.0 {
        // No evidence either way: maximum uncertainty, and no division by zero.
        return CalibrationResult { human: 0.5, ai_generated: 0.5 };
    }

    CalibrationResult {
        human: human_score / total,
        ai_generated: ai_score / total,
    }
}

/// Probability at the index of `target` in `labels`, 0.0 when absent.
fn score_for(labels: &[String], probs: &[f32], target: &str) -> f64 {
    labels
        .iter()
        .position(|l| l == target)
        .and_then(|i| probs.get(i))
        .map(|&p| p as f64)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::{group_detections, Detection};

    fn labels() -> Vec<String> {
        vec!["human".to_string(), "ai_generated".to_string()]
    }

    fn person() -> Detection {
        Detection { label: "person".into(), score: 0.9, bbox: [0.0; 4] }
    }

    #[test]
    fn output_is_normalized_when_evidence_present() {
        let result = calibrated_probabilities(
            &labels(),
            &[0.7, 0.3],
            &FeatureSet { has_exif: true, ela_score: 0.6, edge_score: 0.1 },
            &DistanceSet { human_distance: Some(0.1), ai_distance: Some(0.1) },
            &group_detections(vec![person()], None, None),
        );
        assert!((result.human + result.ai_generated - 1.0).abs() < 1e-9);
    }

    #[test]
    fn no_evidence_yields_uninformative_prior() {
        let result = calibrated_probabilities(
            &labels(),
            &[0.0, 0.0],
            &FeatureSet { has_exif: false, ela_score: 0.0, edge_score: 0.5 },
            &DistanceSet::default(),
            &SemanticResult::placeholder(),
        );
        assert_eq!(result.human, 0.5);
        assert_eq!(result.ai_generated, 0.5);
    }

    #[test]
    fn absent_label_contributes_zero() {
        let odd_labels = vec!["synthetic".to_string(), "ai_generated".to_string()];
        let result = calibrated_probabilities(
            &odd_labels,
            &[0.9, 0.4],
            &FeatureSet { has_exif: false, ela_score: 0.0, edge_score: 0.5 },
            &DistanceSet::default(),
            &SemanticResult::placeholder(),
        );
        // Only the ai_generated mass survives.
        assert!((result.ai_generated - 1.0).abs() < 1e-9);
        assert!(result.human.abs() < 1e-9);
    }

    #[test]
    fn missing_distance_skips_adjustment() {
        let with = calibrated_probabilities(
            &labels(),
            &[0.5, 0.5],
            &FeatureSet { has_exif: false, ela_score: 0.0, edge_score: 0.5 },
            &DistanceSet { human_distance: Some(0.4), ai_distance: None },
            &SemanticResult::placeholder(),
        );
        let without = calibrated_probabilities(
            &labels(),
            &[0.5, 0.5],
            &FeatureSet { has_exif: false, ela_score: 0.0, edge_score: 0.5 },
            &DistanceSet::default(),
            &SemanticResult::placeholder(),
        );
        assert!(with.human > without.human);
        assert_eq!(without.human, 0.5);
    }

    #[test]
    fn worked_example_from_the_field() {
        // EXIF present, close human baseline, one face; no AI-leaning signal
        // fires: 0.6+0.1+0.05+0.05 = 0.8 vs 0.4, normalized over 1.2.
        let result = calibrated_probabilities(
            &labels(),
            &[0.6, 0.4],
            &FeatureSet { has_exif: true, ela_score: 0.3, edge_score: 0.5 },
            &DistanceSet { human_distance: Some(0.4), ai_distance: Some(0.7) },
            &group_detections(vec![person()], None, None),
        );
        assert!((result.human - 0.8 / 1.2).abs() < 1e-9);
        assert!((result.ai_generated - 0.4 / 1.2).abs() < 1e-9);
    }

    #[test]
    fn calibration_event_lands_in_custody_log() {
        let store = CustodyStore::open_in_memory().unwrap();
        let result = calibrate(
            &labels(),
            &[0.6, 0.4],
            &FeatureSet { has_exif: false, ela_score: 0.0, edge_score: 0.5 },
            &DistanceSet::default(),
            &SemanticResult::placeholder(),
            &store,
            Some("abc123"),
        )
        .unwrap();
        assert!((result.human - 0.6).abs() < 1e-9);

        let events = store.events_for_action("calibration").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], "human=0.6000, ai_generated=0.4000");
    }
}
