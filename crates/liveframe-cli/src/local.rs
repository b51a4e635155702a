//! `liveframe score` and `liveframe spoof`: run the pipeline in-process.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use liveframe_core::{
    check_spoofing, BatchPipeline, BatchReport, FaceEmbedder, PipelineConfig, SpoofPolicy,
    SpoofThresholds,
};

pub fn score(
    files: &[PathBuf],
    model_dir: Option<PathBuf>,
    spoof_policy: SpoofPolicy,
    report: bool,
) -> Result<()> {
    let dir = model_dir.unwrap_or_else(liveframe_models::default_model_dir);
    liveframe_models::verify_models_dir(&dir)
        .context("models not ready (run `liveframe models --fetch`)")?;

    let detector = path_str(&dir.join(liveframe_models::DETECTOR.name))?;
    let recognizer = path_str(&dir.join(liveframe_models::RECOGNIZER.name))?;
    tracing::info!(model_dir = %dir.display(), "loading models");
    let embedder = FaceEmbedder::load(&detector, &recognizer)?;

    let frames = crate::frames::encode_files(files)?;
    let config = PipelineConfig {
        spoof_policy,
        ..PipelineConfig::default()
    };
    tracing::debug!(frames = frames.len(), policy = %spoof_policy, "scoring locally");
    let details = BatchPipeline::new(embedder, config).run_detailed(&frames);

    println!("{}", serde_json::to_string_pretty(&details.record)?);
    if report {
        print_report(files, &details);
    }
    Ok(())
}

fn print_report(files: &[PathBuf], report: &BatchReport) {
    println!();
    println!(
        "frames: {} received, {} embedded, {} dropped",
        report.frames_received,
        report.embeddings_used(),
        report.failures.len()
    );
    for (index, verdict) in &report.spoof_verdicts {
        println!(
            "  [{index}] {}: sharpness {:.1}, bright {:.3}, {}",
            files[*index].display(),
            verdict.sharpness,
            verdict.bright_ratio,
            verdict.reason
        );
    }
    for (index, failure) in &report.failures {
        println!("  [{index}] {}: dropped, {failure}", files[*index].display());
    }
    if !report.slow_frames.is_empty() {
        println!("slow embedding calls: {:?}", report.slow_frames);
    }
    if let Some(liveness) = &report.liveness {
        println!(
            "liveness: mean distance {:.4} over {} pair(s)",
            liveness.mean_distance, liveness.pairs_analysed
        );
    }
    println!(
        "timing: {} ms embedding, {} ms total",
        report.embed_time.as_millis(),
        report.total_time.as_millis()
    );
}

pub fn spoof(files: &[PathBuf]) -> Result<()> {
    let thresholds = SpoofThresholds::default();
    for path in files {
        let img = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let verdict = check_spoofing(&img, &thresholds);
        println!(
            "{}: {} (sharpness {:.1}, bright {:.3})",
            path.display(),
            if verdict.is_live { "live" } else { "spoof" },
            verdict.sharpness,
            verdict.bright_ratio
        );
        if !verdict.is_live {
            println!("  {}", verdict.reason);
        }
    }
    Ok(())
}

fn path_str(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_owned)
        .with_context(|| format!("model path is not valid UTF-8: {}", path.display()))
}
