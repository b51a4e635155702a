//! Batch scoring: decode → spoof check → embed → liveness → mean pool.
//!
//! Frames are processed one at a time in arrival order, since liveness
//! compares consecutive frames. A frame that fails at any stage is dropped
//! and recorded as a [`FrameFailure`]; only an empty or inconsistent batch
//! fails the request as a whole.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::mean_pool;
use crate::decode::{decode_frame, DecodeError};
use crate::liveness::{score_liveness, LivenessResult, LivenessThresholds};
use crate::provider::{EmbeddingProvider, ProviderError};
use crate::spoof::{check_spoofing, SpoofThresholds, SpoofVerdict};
use crate::types::{Embedding, EmbeddingError};

pub const NO_FACE_MESSAGE: &str = "No face found";
pub const DIMENSION_MISMATCH_MESSAGE: &str = "Embedding dimension mismatch";

/// How the per-frame spoof heuristic feeds into the batch verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpoofPolicy {
    /// Verdicts are logged and reported but do not affect `liveness`.
    #[default]
    LogOnly,
    /// Any embedded frame judged not live forces `liveness = false`.
    Enforce,
}

impl fmt::Display for SpoofPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SpoofPolicy::LogOnly => "log-only",
            SpoofPolicy::Enforce => "enforce",
        })
    }
}

impl FromStr for SpoofPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log-only" | "log_only" | "log" => Ok(SpoofPolicy::LogOnly),
            "enforce" => Ok(SpoofPolicy::Enforce),
            other => Err(format!("unknown spoof policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub spoof: SpoofThresholds,
    pub liveness: LivenessThresholds,
    pub spoof_policy: SpoofPolicy,
    /// Embedding calls slower than this are logged and listed in
    /// [`BatchReport::slow_frames`]. The embedding is still used; the batch
    /// deadline is what stops a slow batch.
    pub slow_frame: Option<Duration>,
    /// Frames not yet started when this much time has passed are dropped.
    pub batch_timeout: Option<Duration>,
}

/// The response for one batch. Absent fields are omitted from JSON, giving
/// exactly two shapes: `{success:false, message}` and
/// `{success:true, vector, liveness, debug_score}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResultRecord {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            vector: None,
            liveness: None,
            debug_score: None,
            message: Some(message.into()),
        }
    }

    pub fn success(vector: Vec<f32>, liveness: bool, debug_score: f32) -> Self {
        Self {
            success: true,
            vector: Some(vector),
            liveness: Some(liveness),
            debug_score: Some(debug_score),
            message: None,
        }
    }
}

/// Why a frame was left out of the batch.
#[derive(Error, Debug)]
pub enum FrameFailure {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("embedding failed: {0}")]
    Detection(#[from] ProviderError),
    #[error("batch deadline passed before the frame was processed")]
    BatchDeadline,
}

/// Outcome of one batch with the diagnostics behind it.
#[derive(Debug)]
pub struct BatchReport {
    pub record: ResultRecord,
    pub frames_received: usize,
    /// Frames dropped, by arrival index.
    pub failures: Vec<(usize, FrameFailure)>,
    /// Spoof verdicts of the frames that produced embeddings, by arrival index.
    pub spoof_verdicts: Vec<(usize, SpoofVerdict)>,
    pub liveness: Option<LivenessResult>,
    /// Frames whose embedding call exceeded `slow_frame`, by arrival index.
    pub slow_frames: Vec<usize>,
    /// Time spent inside the embedding provider.
    pub embed_time: Duration,
    pub total_time: Duration,
}

impl BatchReport {
    pub fn embeddings_used(&self) -> usize {
        self.spoof_verdicts.len()
    }
}

struct FrameSample {
    index: usize,
    embedding: Embedding,
    spoof: SpoofVerdict,
    slow: bool,
}

/// Scores batches of encoded frames with an injected embedding provider.
pub struct BatchPipeline<P> {
    provider: P,
    config: PipelineConfig,
}

impl<P: EmbeddingProvider> BatchPipeline<P> {
    pub fn new(provider: P, config: PipelineConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Score a batch and return only the caller-facing record.
    pub fn run<S: AsRef<str>>(&mut self, frames: &[S]) -> ResultRecord {
        self.run_detailed(frames).record
    }

    /// Score a batch, keeping per-frame diagnostics.
    pub fn run_detailed<S: AsRef<str>>(&mut self, frames: &[S]) -> BatchReport {
        let started = Instant::now();
        let deadline = self.config.batch_timeout.map(|t| started + t);

        let mut samples = Vec::with_capacity(frames.len());
        let mut failures = Vec::new();
        let mut embed_time = Duration::ZERO;

        for (index, frame) in frames.iter().enumerate() {
            let result = if deadline.is_some_and(|d| Instant::now() >= d) {
                Err(FrameFailure::BatchDeadline)
            } else {
                self.process_frame(index, frame.as_ref(), &mut embed_time)
            };

            match result {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    tracing::debug!(frame = index, error = %e, "frame dropped");
                    failures.push((index, e));
                }
            }
        }

        let (record, liveness) = self.score(&samples);
        let slow_frames: Vec<usize> = samples.iter().filter(|s| s.slow).map(|s| s.index).collect();
        let spoof_verdicts: Vec<(usize, SpoofVerdict)> =
            samples.into_iter().map(|s| (s.index, s.spoof)).collect();

        let report = BatchReport {
            record,
            frames_received: frames.len(),
            failures,
            spoof_verdicts,
            liveness,
            slow_frames,
            embed_time,
            total_time: started.elapsed(),
        };

        tracing::info!(
            frames = report.frames_received,
            embeddings = report.embeddings_used(),
            dropped = report.failures.len(),
            success = report.record.success,
            liveness = ?report.record.liveness,
            debug_score = ?report.record.debug_score,
            embed_ms = report.embed_time.as_millis() as u64,
            total_ms = report.total_time.as_millis() as u64,
            "batch scored"
        );

        report
    }

    fn process_frame(
        &mut self,
        index: usize,
        frame: &str,
        embed_time: &mut Duration,
    ) -> Result<FrameSample, FrameFailure> {
        let image = decode_frame(frame)?;

        let spoof = check_spoofing(&image, &self.config.spoof);
        tracing::debug!(
            frame = index,
            sharpness = spoof.sharpness,
            bright_ratio = spoof.bright_ratio,
            live = spoof.is_live,
            reason = %spoof.reason,
            "spoof heuristic"
        );

        let t0 = Instant::now();
        let result = self.provider.embed(&image);
        let elapsed = t0.elapsed();
        *embed_time += elapsed;

        let slow = self.config.slow_frame.is_some_and(|limit| elapsed > limit);
        if slow {
            tracing::warn!(
                frame = index,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow embedding call"
            );
        }

        Ok(FrameSample {
            index,
            embedding: result?,
            spoof,
            slow,
        })
    }

    fn score(&self, samples: &[FrameSample]) -> (ResultRecord, Option<LivenessResult>) {
        if samples.is_empty() {
            return (ResultRecord::failure(NO_FACE_MESSAGE), None);
        }

        let embeddings: Vec<Embedding> = samples.iter().map(|s| s.embedding.clone()).collect();
        let scored = score_liveness(&embeddings, &self.config.liveness)
            .and_then(|liveness| Ok((liveness, mean_pool(&embeddings)?)));

        let (liveness, pooled) = match scored {
            Ok(v) => v,
            Err(e @ EmbeddingError::DimensionMismatch { .. }) => {
                tracing::warn!(error = %e, "rejecting batch with inconsistent embeddings");
                return (ResultRecord::failure(DIMENSION_MISMATCH_MESSAGE), None);
            }
            Err(EmbeddingError::Empty) => {
                return (ResultRecord::failure(NO_FACE_MESSAGE), None);
            }
        };

        let mut is_live = liveness.is_live;
        if self.config.spoof_policy == SpoofPolicy::Enforce {
            if let Some(flagged) = samples.iter().find(|s| !s.spoof.is_live) {
                tracing::info!(
                    frame = flagged.index,
                    reason = %flagged.spoof.reason,
                    "spoof heuristic rejected batch"
                );
                is_live = false;
            }
        }

        let record = ResultRecord::success(pooled.values, is_live, liveness.mean_distance);
        (record, Some(liveness))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use std::collections::VecDeque;
    use std::io::Cursor;

    /// Provider that replays a fixed script of results, one per call.
    struct ScriptedProvider {
        script: VecDeque<Result<Embedding, ProviderError>>,
        delay: Duration,
        calls: usize,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<Embedding, ProviderError>>) -> Self {
            Self {
                script: script.into(),
                delay: Duration::ZERO,
                calls: 0,
            }
        }

        fn ok(vectors: &[&[f32]]) -> Self {
            Self::new(vectors.iter().map(|v| Ok(Embedding::new(v.to_vec()))).collect())
        }
    }

    impl EmbeddingProvider for ScriptedProvider {
        fn embed(&mut self, _image: &DynamicImage) -> Result<Embedding, ProviderError> {
            self.calls += 1;
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            self.script.pop_front().unwrap_or(Err(ProviderError::NoFace))
        }
    }

    fn encode(img: GrayImage) -> String {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(buf.into_inner())
        )
    }

    /// A frame that passes the spoof heuristic.
    fn textured_frame() -> String {
        encode(GrayImage::from_fn(64, 64, |x, _| {
            Luma([if (x / 4) % 2 == 0 { 100 } else { 140 }])
        }))
    }

    /// A frame the spoof heuristic rejects as blurry.
    fn flat_frame() -> String {
        encode(GrayImage::from_pixel(64, 64, Luma([128])))
    }

    fn frames(n: usize) -> Vec<String> {
        (0..n).map(|_| textured_frame()).collect()
    }

    #[test]
    fn test_all_frames_undecodable() {
        let mut pipeline = BatchPipeline::new(ScriptedProvider::ok(&[]), PipelineConfig::default());
        let report =
            pipeline.run_detailed(&["", "not base64 at all!", "data:image/png;base64,AAAA"]);
        assert_eq!(report.record, ResultRecord::failure("No face found"));
        assert_eq!(report.failures.len(), 3);
        assert!(report
            .failures
            .iter()
            .all(|(_, f)| matches!(f, FrameFailure::Decode(_))));
    }

    #[test]
    fn test_all_frames_without_face() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::NoFace),
            Err(ProviderError::NoFace),
        ]);
        let mut pipeline = BatchPipeline::new(provider, PipelineConfig::default());
        let record = pipeline.run(&frames(2));
        assert!(!record.success);
        assert_eq!(record.message.as_deref(), Some("No face found"));
        assert_eq!(record.vector, None);
        assert_eq!(record.liveness, None);
    }

    #[test]
    fn test_empty_batch() {
        let mut pipeline = BatchPipeline::new(ScriptedProvider::ok(&[]), PipelineConfig::default());
        let empty: [&str; 0] = [];
        assert_eq!(pipeline.run(&empty), ResultRecord::failure(NO_FACE_MESSAGE));
    }

    #[test]
    fn test_single_frame_is_live_with_raw_vector() {
        let v = [0.25f32, -0.5, 0.125, 0.333];
        let mut pipeline =
            BatchPipeline::new(ScriptedProvider::ok(&[&v]), PipelineConfig::default());
        let record = pipeline.run(&frames(1));
        assert_eq!(record, ResultRecord::success(v.to_vec(), true, 0.0));
    }

    #[test]
    fn test_identical_frames_rejected_as_static() {
        let v = [0.1f32, 0.2, 0.3];
        let mut pipeline =
            BatchPipeline::new(ScriptedProvider::ok(&[&v, &v]), PipelineConfig::default());
        let record = pipeline.run(&frames(2));
        assert!(record.success);
        assert_eq!(record.liveness, Some(false));
        assert_eq!(record.debug_score, Some(0.0));
        assert_eq!(record.vector, Some(v.to_vec()));
    }

    #[test]
    fn test_boundary_distances_stay_live() {
        let mut low = BatchPipeline::new(
            ScriptedProvider::ok(&[&[0.0], &[0.02]]),
            PipelineConfig::default(),
        );
        let record = low.run(&frames(2));
        assert_eq!(record.debug_score, Some(0.02));
        assert_eq!(record.liveness, Some(true));

        let mut high = BatchPipeline::new(
            ScriptedProvider::ok(&[&[0.0], &[0.3]]),
            PipelineConfig::default(),
        );
        let record = high.run(&frames(2));
        assert_eq!(record.debug_score, Some(0.3));
        assert_eq!(record.liveness, Some(true));
    }

    #[test]
    fn test_pooled_vector_is_order_independent() {
        let a: &[f32] = &[0.10, 0.20, 0.30];
        let b: &[f32] = &[0.12, 0.18, 0.33];
        let c: &[f32] = &[0.30, 0.01, 0.29];

        let mut forward =
            BatchPipeline::new(ScriptedProvider::ok(&[a, b, c]), PipelineConfig::default());
        let mut reordered =
            BatchPipeline::new(ScriptedProvider::ok(&[c, a, b]), PipelineConfig::default());

        let r1 = forward.run(&frames(3));
        let r2 = reordered.run(&frames(3));
        assert_eq!(r1.vector, r2.vector);
        assert_ne!(r1.debug_score, r2.debug_score);
    }

    #[test]
    fn test_tolerates_one_failed_detection() {
        let provider = ScriptedProvider::new(vec![
            Ok(Embedding::new(vec![0.0, 0.0])),
            Err(ProviderError::NoFace),
            Ok(Embedding::new(vec![0.1, 0.0])),
        ]);
        let mut pipeline = BatchPipeline::new(provider, PipelineConfig::default());
        let report = pipeline.run_detailed(&frames(3));

        assert!(report.record.success);
        assert_eq!(report.embeddings_used(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, 1);
        assert!(matches!(
            report.failures[0].1,
            FrameFailure::Detection(ProviderError::NoFace)
        ));
        assert_eq!(report.liveness.as_ref().map(|l| l.pairs_analysed), Some(1));
        assert_eq!(report.record.vector, Some(vec![0.05, 0.0]));
    }

    #[test]
    fn test_undecodable_frame_skips_provider() {
        let mut pipeline = BatchPipeline::new(
            ScriptedProvider::ok(&[&[0.0], &[0.1]]),
            PipelineConfig::default(),
        );
        let batch = vec![textured_frame(), "%%%".to_string(), textured_frame()];
        let report = pipeline.run_detailed(&batch);

        assert_eq!(pipeline.provider.calls, 2);
        assert_eq!(report.embeddings_used(), 2);
        assert_eq!(report.record.liveness, Some(true));
    }

    #[test]
    fn test_dimension_mismatch_fails_batch() {
        let mut pipeline = BatchPipeline::new(
            ScriptedProvider::ok(&[&[0.0, 0.1], &[0.0, 0.1, 0.2]]),
            PipelineConfig::default(),
        );
        let record = pipeline.run(&frames(2));
        assert_eq!(record, ResultRecord::failure("Embedding dimension mismatch"));
    }

    #[test]
    fn test_spoof_verdict_is_log_only_by_default() {
        let mut pipeline = BatchPipeline::new(
            ScriptedProvider::ok(&[&[0.0], &[0.1]]),
            PipelineConfig::default(),
        );
        let report = pipeline.run_detailed(&[textured_frame(), flat_frame()]);

        assert_eq!(report.record.liveness, Some(true));
        assert!(report.spoof_verdicts[0].1.is_live);
        assert!(!report.spoof_verdicts[1].1.is_live);
    }

    #[test]
    fn test_enforced_spoof_policy_overrides_liveness() {
        let config = PipelineConfig {
            spoof_policy: SpoofPolicy::Enforce,
            ..PipelineConfig::default()
        };
        let mut pipeline = BatchPipeline::new(ScriptedProvider::ok(&[&[0.0], &[0.1]]), config);
        let record = pipeline.run(&[textured_frame(), flat_frame()]);

        assert!(record.success);
        assert_eq!(record.liveness, Some(false));
        assert_eq!(record.debug_score, Some(0.1));
    }

    #[test]
    fn test_enforced_policy_passes_clean_frames() {
        let config = PipelineConfig {
            spoof_policy: SpoofPolicy::Enforce,
            ..PipelineConfig::default()
        };
        let mut pipeline = BatchPipeline::new(ScriptedProvider::ok(&[&[0.0], &[0.1]]), config);
        assert_eq!(pipeline.run(&frames(2)).liveness, Some(true));
    }

    #[test]
    fn test_slow_frames_keep_their_embeddings() {
        let mut provider = ScriptedProvider::ok(&[&[0.0], &[0.1], &[0.2]]);
        provider.delay = Duration::from_millis(30);
        let config = PipelineConfig {
            slow_frame: Some(Duration::from_millis(5)),
            ..PipelineConfig::default()
        };
        let mut pipeline = BatchPipeline::new(provider, config);
        let report = pipeline.run_detailed(&frames(3));

        assert!(report.record.success);
        assert_eq!(report.record.liveness, Some(true));
        assert!(report.failures.is_empty());
        assert_eq!(report.embeddings_used(), 3);
        assert_eq!(report.slow_frames, vec![0, 1, 2]);
    }

    #[test]
    fn test_batch_deadline_cuts_off_slow_provider() {
        let mut provider = ScriptedProvider::ok(&[&[0.0], &[0.1], &[0.2], &[0.3]]);
        provider.delay = Duration::from_millis(50);
        let config = PipelineConfig {
            batch_timeout: Some(Duration::from_millis(75)),
            ..PipelineConfig::default()
        };
        let mut pipeline = BatchPipeline::new(provider, config);
        let report = pipeline.run_detailed(&frames(4));

        assert!(report.record.success);
        assert_eq!(pipeline.provider.calls, 2);
        assert_eq!(report.embeddings_used(), 2);
        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .iter()
            .all(|(_, f)| matches!(f, FrameFailure::BatchDeadline)));
        assert!(report.total_time < Duration::from_millis(200));
    }

    #[test]
    fn test_expired_batch_deadline_drops_remaining_frames() {
        let config = PipelineConfig {
            batch_timeout: Some(Duration::ZERO),
            ..PipelineConfig::default()
        };
        let mut pipeline = BatchPipeline::new(ScriptedProvider::ok(&[&[0.0], &[0.1]]), config);
        let report = pipeline.run_detailed(&frames(2));

        assert_eq!(pipeline.provider.calls, 0);
        assert_eq!(report.record, ResultRecord::failure(NO_FACE_MESSAGE));
        assert!(report
            .failures
            .iter()
            .all(|(_, f)| matches!(f, FrameFailure::BatchDeadline)));
    }

    #[test]
    fn test_record_json_shapes() {
        let failure = serde_json::to_value(ResultRecord::failure(NO_FACE_MESSAGE)).unwrap();
        assert_eq!(
            failure,
            serde_json::json!({ "success": false, "message": "No face found" })
        );

        let success =
            serde_json::to_value(ResultRecord::success(vec![1.0, -0.5], true, 0.0)).unwrap();
        assert_eq!(
            success,
            serde_json::json!({
                "success": true,
                "vector": [1.0, -0.5],
                "liveness": true,
                "debug_score": 0.0
            })
        );
    }

    #[test]
    fn test_spoof_policy_parsing() {
        assert_eq!("enforce".parse::<SpoofPolicy>(), Ok(SpoofPolicy::Enforce));
        assert_eq!("Log-Only".parse::<SpoofPolicy>(), Ok(SpoofPolicy::LogOnly));
        assert!("sometimes".parse::<SpoofPolicy>().is_err());
        assert_eq!(SpoofPolicy::Enforce.to_string(), "enforce");
    }
}
