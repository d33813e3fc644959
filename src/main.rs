mod calibrate;
mod classify;
mod config;
mod database;
mod error;
mod fingerprint;
mod media;
mod pipeline;
mod retrain;
mod semantic;
mod verdict;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use crate::classify::OnnxClassifier;
use crate::database::CustodyStore;
use crate::pipeline::Pipeline;
use crate::retrain::{should_retrain, RetrainPolicy};
use crate::semantic::{Detector, JsonDetector, OnnxDetector};

const ACTOR: &str = "cli";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Image to analyze
    image_path: PathBuf,

    /// Custody store location (default: DEEPSEE_DB_PATH or ./deepsee_trainer.db)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Classifier ONNX model
    #[arg(long)]
    classifier: Option<PathBuf>,

    /// Detector ONNX model
    #[arg(long)]
    detector: Option<PathBuf>,

    /// Detector output as a JSON file from an external tool (takes
    /// precedence over --detector)
    #[arg(long)]
    semantic_json: Option<PathBuf>,

    /// Record an operator ground-truth flag for this image, e.g. "AI" or "Human"
    #[arg(long)]
    flag: Option<String>,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let db_path = args.db_path.clone().unwrap_or_else(config::db_path);
    let store = match CustodyStore::open(&db_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Fatal error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&store, args) {
        eprintln!("Fatal error: {e}");
        std::process::exit(1);
    }
}

fn run(store: &CustodyStore, args: Args) -> Result<()> {
    store.append(None, "script_entry", ACTOR, "deepsee invoked")?;

    let classifier_path = annotate_fatal(store, config::classifier_path(args.classifier))?;
    let classifier =
        annotate_fatal(store, OnnxClassifier::load(&classifier_path).map_err(Into::into))?;
    store.append(None, "classifier_load", ACTOR, &classifier_path.display().to_string())?;

    let detector = build_detector(store, args.semantic_json, args.detector)?;

    let mut pipeline = Pipeline::new(store, Box::new(classifier), detector);
    // Pipeline failures are already annotated into the custody trail.
    let outcome = pipeline.run(&args.image_path)?;

    println!("Final verdict: {}", outcome.verdict);
    println!(
        "Calibration: human {:.2}%  ai {:.2}%",
        outcome.calibration.human * 100.0,
        outcome.calibration.ai_generated * 100.0
    );
    println!("Faces detected: {}", outcome.semantic.faces.len());
    println!("Anomaly flags: {:?}", outcome.semantic.anomaly_flags);
    println!("Scene consistency: {}", outcome.semantic.scene_consistency);
    if outcome.near_duplicate {
        println!("Note: near-duplicate of a previously seen image");
    }
    if let Some(record) = store.get_image(&outcome.fingerprint.content_hash)? {
        println!("First seen: {}  Last seen: {}", record.first_seen_ts, record.last_seen_ts);
    }

    if let Some(flag) = args.flag {
        store.append(
            Some(&outcome.fingerprint.content_hash),
            "trainer_flag",
            ACTOR,
            &format!("operator flagged {flag}"),
        )?;
    }

    if should_retrain(store, RetrainPolicy::default())? {
        info!("retraining criteria met");
        println!("Retraining criteria met: enough balanced trainer flags accumulated.");
    }

    store.append(
        None,
        "script_exit",
        ACTOR,
        &format!("{}:{}", args.image_path.display(), outcome.verdict),
    )?;
    Ok(())
}

/// Pick a detector backend. JSON sidecar wins; otherwise try the ONNX model
/// if one is configured. Unavailability is degraded service, not fatal, and
/// is recorded as such.
fn build_detector(
    store: &CustodyStore,
    semantic_json: Option<PathBuf>,
    detector_model: Option<PathBuf>,
) -> Result<Option<Box<dyn Detector>>> {
    if let Some(json_path) = semantic_json {
        return Ok(Some(Box::new(JsonDetector::new(json_path))));
    }

    match config::detector_path(detector_model) {
        Some(model_path) => match OnnxDetector::load(&model_path) {
            Ok(detector) => Ok(Some(Box::new(detector))),
            Err(e) => {
                warn!("Failed to load detector model: {e}");
                store.append(None, "detector_unavailable", "detector", &e.to_string())?;
                Ok(None)
            }
        },
        None => {
            store.append(None, "detector_unavailable", "detector", "no detector model found")?;
            Ok(None)
        }
    }
}

/// Append a terminal error event for failures that happen before the
/// orchestrator takes over, then hand the error back.
fn annotate_fatal<T>(store: &CustodyStore, result: Result<T>) -> Result<T> {
    if let Err(ref e) = result {
        if let Err(log_err) = store.append(None, "script_exit_error", ACTOR, &e.to_string()) {
            error!("failed to record error event: {log_err}");
        }
    }
    result
}
