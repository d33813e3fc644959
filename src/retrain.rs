use tracing::debug;

use crate::database::CustodyStore;
use crate::error::DeepSeeError;

/// Thresholds for the retrain trigger. Defaults: at least 50 operator flags
/// with an AI share between 40% and 60% (a lopsided flag stream means the
/// model is failing on one class only, which retraining on it would amplify).
#[derive(Debug, Clone, Copy)]
pub struct RetrainPolicy {
    pub min_new_flags: usize,
    pub min_ratio: f64,
    pub max_ratio: f64,
}

impl Default for RetrainPolicy {
    fn default() -> Self {
        Self { min_new_flags: 50, min_ratio: 0.4, max_ratio: 0.6 }
    }
}

/// Heuristic trigger for an external retraining job; reads `trainer_flag`
/// events and has no side effects. Matching of "AI"/"Human" in the details
/// is case-sensitive by logging convention, and an event may match both or
/// neither.
pub fn should_retrain(store: &CustodyStore, policy: RetrainPolicy) -> Result<bool, DeepSeeError> {
    let flags = store.events_for_action("trainer_flag")?;
    let total = flags.len();
    if total < policy.min_new_flags {
        return Ok(false);
    }

    let ai_flags = flags.iter().filter(|d| d.contains("AI")).count();
    let ratio = ai_flags as f64 / total as f64;
    debug!(total, ai_flags, ratio, "retrain check");

    Ok(policy.min_ratio <= ratio && ratio <= policy.max_ratio)
}
