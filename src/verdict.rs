use std::fmt;

use crate::calibrate::CalibrationResult;
use crate::database::CustodyStore;
use crate::error::DeepSeeError;
use crate::semantic::FeatureSet;

const ACTOR: &str = "verdict";

/// Discrete classification shown to the end user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Human,
    AiGenerated,
    LikelyNotAi,
    LikelyAi,
    Inconclusive,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Human => "human",
            Verdict::AiGenerated => "ai_generated",
            Verdict::LikelyNotAi => "likely_not_ai",
            Verdict::LikelyAi => "likely_ai",
            Verdict::Inconclusive => "inconclusive",
        };
        f.write_str(s)
    }
}

/// Map a calibration pair plus the has-EXIF flag to a verdict and record it.
pub fn resolve(
    calibration: &CalibrationResult,
    feats: &FeatureSet,
    store: &CustodyStore,
    content_hash: Option<&str>,
) -> Result<Verdict, DeepSeeError> {
    let human_pct = round2(calibration.human * 100.0);
    let ai_pct = round2(calibration.ai_generated * 100.0);
    let verdict = resolve_verdict(human_pct, ai_pct, feats.has_exif);

    store.append(
        content_hash,
        "final_verdict",
        ACTOR,
        &format!(
            "human_pct={human_pct}, ai_pct={ai_pct}, has_exif={}, verdict={verdict}",
            feats.has_exif
        ),
    )?;
    Ok(verdict)
}

/// Ordered rule cascade; first match wins, so branch order is load-bearing.
/// An EXIF-backed 90% human reading outranks a 90% AI reading.
pub fn resolve_verdict(human_pct: f64, ai_pct: f64, has_exif: bool) -> Verdict {
    if has_exif && human_pct >= 90.0 {
        Verdict::LikelyNotAi
    } else if ai_pct >= 90.0 {
        Verdict::LikelyAi
    } else if human_pct >= 75.0 && has_exif {
        Verdict::LikelyNotAi
    } else if ai_pct >= 75.0 {
        Verdict::LikelyAi
    } else if human_pct > ai_pct && human_pct >= 60.0 {
        Verdict::Human
    } else if ai_pct > human_pct && ai_pct >= 60.0 {
        Verdict::AiGenerated
    } else {
        Verdict::Inconclusive
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
