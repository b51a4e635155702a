//! Passive liveness scoring via embedding drift across consecutive frames.
//!
//! A live person in front of the camera never holds perfectly still: small
//! head motion, expression changes and lighting flicker move each frame's
//! embedding a little. A replayed photograph produces near-identical
//! embeddings frame after frame. At the other extreme, embeddings that jump
//! far apart between frames point to motion blur, detector noise or a change
//! of subject, none of which should authenticate.
//!
//! The scorer therefore accepts a burst only when the mean consecutive-pair
//! Euclidean distance falls inside a band.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Printed photographs and static screen captures held still.
//! - **Does not block:** Video replay with natural motion, 3D masks.

use serde::{Deserialize, Serialize};

use crate::types::{check_uniform_dim, Embedding, EmbeddingError};

/// Default lower bound on mean consecutive distance. Below this the burst is
/// treated as a static image.
pub const DEFAULT_MIN_MEAN_DISTANCE: f32 = 0.02;

/// Default upper bound on mean consecutive distance. Above this the frames
/// are too inconsistent to describe one steady face.
pub const DEFAULT_MAX_MEAN_DISTANCE: f32 = 0.3;

/// Accepted band for the mean consecutive embedding distance.
///
/// Both bounds are exclusive rejections: a score exactly on a bound is live.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessThresholds {
    pub min_mean_distance: f32,
    pub max_mean_distance: f32,
}

impl Default for LivenessThresholds {
    fn default() -> Self {
        Self {
            min_mean_distance: DEFAULT_MIN_MEAN_DISTANCE,
            max_mean_distance: DEFAULT_MAX_MEAN_DISTANCE,
        }
    }
}

/// Result of an embedding drift liveness check.
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessResult {
    /// Whether the burst passed the check (true = likely live).
    pub is_live: bool,
    /// Mean Euclidean distance between consecutive embeddings. Reported to
    /// callers as `debug_score`.
    pub mean_distance: f32,
    /// Number of consecutive pairs analysed.
    pub pairs_analysed: usize,
}

/// Score an ordered burst of embeddings for liveness.
///
/// Pairs are formed from consecutive frames in arrival order, so reordering
/// the input can change the score. Returns `is_live = true` with a score of
/// 0.0 when fewer than 2 embeddings are provided: motion cannot be judged
/// from a single frame.
pub fn score_liveness(
    embeddings: &[Embedding],
    thresholds: &LivenessThresholds,
) -> Result<LivenessResult, EmbeddingError> {
    if embeddings.len() < 2 {
        return Ok(LivenessResult {
            is_live: true,
            mean_distance: 0.0,
            pairs_analysed: 0,
        });
    }

    check_uniform_dim(embeddings)?;

    let mut total = 0.0f32;
    let mut pairs = 0usize;
    for pair in embeddings.windows(2) {
        total += pair[0].euclidean_distance(&pair[1])?;
        pairs += 1;
    }
    let mean = total / pairs as f32;

    let too_static = mean < thresholds.min_mean_distance;
    let too_erratic = mean > thresholds.max_mean_distance;

    Ok(LivenessResult {
        is_live: !too_static && !too_erratic,
        mean_distance: mean,
        pairs_analysed: pairs,
    })
}
