use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::info;
use walkdir::WalkDir;

const DB_ENV: &str = "DEEPSEE_DB_PATH";
const CLASSIFIER_ENV: &str = "DEEPSEE_CLASSIFIER_PATH";
const DETECTOR_ENV: &str = "DEEPSEE_DETECTOR_PATH";

const CLASSIFIER_FILENAME: &str = "deepsee_classifier.onnx";
const DETECTOR_FILENAME: &str = "deepsee_detector.onnx";

/// Custody store location: env override first, else a local file.
pub fn db_path() -> PathBuf {
    std::env::var(DB_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("deepsee_trainer.db"))
}

/// Classifier model artifact: CLI override, env override, `.env` cache, then
/// a bounded filesystem search (cached back into `.env` on success).
pub fn classifier_path(cli_override: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = cli_override {
        return Ok(path);
    }
    if let Ok(path) = std::env::var(CLASSIFIER_ENV) {
        return Ok(PathBuf::from(path));
    }

    let env_path = Path::new(".env");
    if env_path.exists() {
        if let Some(path) = load_env_key(env_path, "CLASSIFIER_MODEL_PATH")? {
            info!("Loaded classifier path from .env");
            return Ok(path);
        }
    }

    info!("Classifier not configured. Searching filesystem...");
    let found = find_file(CLASSIFIER_FILENAME, 5)?;
    info!("Found classifier model: {:?}", found);
    save_env_key(env_path, "CLASSIFIER_MODEL_PATH", &found)?;
    Ok(found)
}

/// Detector model artifact. Unlike the classifier this is optional: the
/// pipeline degrades to placeholder semantics without it.
pub fn detector_path(cli_override: Option<PathBuf>) -> Option<PathBuf> {
    if cli_override.is_some() {
        return cli_override;
    }
    if let Ok(path) = std::env::var(DETECTOR_ENV) {
        return Some(PathBuf::from(path));
    }

    let env_path = Path::new(".env");
    if env_path.exists() {
        if let Ok(Some(path)) = load_env_key(env_path, "DETECTOR_MODEL_PATH") {
            return Some(path);
        }
    }

    find_file(DETECTOR_FILENAME, 5).ok()
}

fn find_file(filename: &str, max_depth: usize) -> Result<PathBuf> {
    let root = std::env::current_dir()?;

    let search_result = WalkDir::new(&root)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_name() == filename);

    if let Some(entry) = search_result {
        return Ok(entry.path().to_path_buf());
    }

    // Useful when running from a subdirectory of the workstation checkout.
    if let Some(parent) = root.parent() {
        let parent_result = WalkDir::new(parent)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_name() == filename);

        if let Some(entry) = parent_result {
            return Ok(entry.path().to_path_buf());
        }
    }

    Err(anyhow!("Could not find file '{}' in nearby directories.", filename))
}

fn load_env_key(path: &Path, key: &str) -> Result<Option<PathBuf>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    for line in reader.lines() {
        let line = line?;
        if let Some((k, value)) = line.split_once('=') {
            if k.trim() == key {
                return Ok(Some(PathBuf::from(value.trim())));
            }
        }
    }
    Ok(None)
}

fn save_env_key(path: &Path, key: &str, value: &Path) -> Result<()> {
    let mut lines: Vec<String> = if path.exists() {
        BufReader::new(File::open(path)?)
            .lines()
            .collect::<std::io::Result<_>>()?
    } else {
        Vec::new()
    };

    lines.retain(|l| l.split_once('=').map(|(k, _)| k.trim() != key).unwrap_or(true));
    lines.push(format!("{}={}", key, value.display()));

    let mut file = File::create(path).context("Failed to create .env file")?;
    for line in lines {
        writeln!(file, "{line}")?;
    }
    Ok(())
}
