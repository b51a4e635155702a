//! liveframe-core: multi-frame face scoring.
//!
//! Turns a short burst of encoded camera frames into one mean-pooled identity
//! embedding and a liveness verdict. Liveness comes from embedding-space
//! statistics across consecutive frames, backed by cheap image heuristics that
//! flag screen and print replays.
//!
//! The embedding model is injected through [`EmbeddingProvider`]; the ONNX
//! implementation ([`FaceEmbedder`]) pairs SCRFD detection with ArcFace
//! recognition.

pub mod aggregate;
pub mod align;
pub mod decode;
pub mod detector;
pub mod embedder;
pub mod liveness;
pub mod pipeline;
pub mod provider;
pub mod recognizer;
pub mod spoof;
pub mod types;

pub use aggregate::mean_pool;
pub use decode::{decode_frame, DecodeError};
pub use detector::{Detection, FaceDetector};
pub use embedder::FaceEmbedder;
pub use liveness::{score_liveness, LivenessResult, LivenessThresholds};
pub use pipeline::{
    BatchPipeline, BatchReport, FrameFailure, PipelineConfig, ResultRecord, SpoofPolicy,
};
pub use provider::{EmbeddingProvider, ProviderError};
pub use recognizer::FaceRecognizer;
pub use spoof::{check_spoofing, SpoofReason, SpoofThresholds, SpoofVerdict};
pub use types::{Embedding, EmbeddingError};
