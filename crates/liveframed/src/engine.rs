use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use liveframe_core::{BatchPipeline, BatchReport, EmbeddingProvider, PipelineConfig, ProviderError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Requests queued per worker before senders start waiting.
const QUEUE_DEPTH: usize = 8;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("embedding provider failed to load: {0}")]
    Provider(#[from] ProviderError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("scoring timed out after {0:?}")]
    Timeout(Duration),
}

/// Messages sent from HTTP handlers to an engine thread.
enum EngineRequest {
    Score {
        frames: Vec<String>,
        span: tracing::Span,
        reply: oneshot::Sender<BatchReport>,
    },
}

/// Clone-safe handle to the engine threads.
#[derive(Clone)]
pub struct EngineHandle {
    workers: Arc<[mpsc::Sender<EngineRequest>]>,
    next: Arc<AtomicUsize>,
}

impl EngineHandle {
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Score one batch on the next worker in turn.
    ///
    /// `timeout` bounds the whole round trip, queueing included. A request
    /// that times out is abandoned; the worker skips it if it has not started.
    pub async fn score(
        &self,
        frames: Vec<String>,
        timeout: Option<Duration>,
    ) -> Result<BatchReport, EngineError> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.dispatch(frames))
                .await
                .map_err(|_| EngineError::Timeout(limit))?,
            None => self.dispatch(frames).await,
        }
    }

    async fn dispatch(&self, frames: Vec<String>) -> Result<BatchReport, EngineError> {
        let worker = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.workers[worker]
            .send(EngineRequest::Score {
                frames,
                span: tracing::Span::current(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn `workers` engine threads, each owning one embedding provider.
///
/// Providers are built on the calling thread before any thread starts, so
/// a missing or corrupt model fails startup rather than the first request.
pub fn spawn_engine<P, F>(
    workers: usize,
    mut factory: F,
    config: PipelineConfig,
) -> Result<EngineHandle, EngineError>
where
    P: EmbeddingProvider + Send + 'static,
    F: FnMut() -> Result<P, ProviderError>,
{
    let count = workers.max(1);
    let mut pipelines = Vec::with_capacity(count);
    for _ in 0..count {
        pipelines.push(BatchPipeline::new(factory()?, config.clone()));
    }

    let mut senders = Vec::with_capacity(count);
    for (id, mut pipeline) in pipelines.into_iter().enumerate() {
        let (tx, mut rx) = mpsc::channel::<EngineRequest>(QUEUE_DEPTH);
        std::thread::Builder::new()
            .name(format!("liveframe-engine-{id}"))
            .spawn(move || {
                tracing::info!(worker = id, "engine thread started");
                while let Some(req) = rx.blocking_recv() {
                    match req {
                        EngineRequest::Score {
                            frames,
                            span,
                            reply,
                        } => {
                            let _entered = span.enter();
                            if reply.is_closed() {
                                tracing::debug!(worker = id, "request abandoned before scoring");
                                continue;
                            }
                            let report = pipeline.run_detailed(&frames);
                            let _ = reply.send(report);
                        }
                    }
                }
                tracing::info!(worker = id, "engine thread exiting");
            })
            .map_err(EngineError::Spawn)?;
        senders.push(tx);
    }

    Ok(EngineHandle {
        workers: senders.into(),
        next: Arc::new(AtomicUsize::new(0)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{textured_frame, CountingProvider};

    #[tokio::test]
    async fn test_scores_batch_on_worker_thread() {
        let engine = spawn_engine(1, || Ok(CountingProvider::default()), PipelineConfig::default())
            .unwrap();
        let frames = vec![textured_frame(), textured_frame(), textured_frame()];

        let report = engine.score(frames, None).await.unwrap();
        assert!(report.record.success);
        assert_eq!(report.embeddings_used(), 3);
        assert_eq!(report.record.liveness, Some(true));
    }

    #[tokio::test]
    async fn test_builds_one_provider_per_worker() {
        let mut built = 0;
        let engine = spawn_engine(
            3,
            || {
                built += 1;
                Ok(CountingProvider::default())
            },
            PipelineConfig::default(),
        )
        .unwrap();
        assert_eq!(built, 3);
        assert_eq!(engine.workers(), 3);

        for _ in 0..6 {
            let report = engine.score(vec![textured_frame()], None).await.unwrap();
            assert!(report.record.success);
        }
    }

    #[tokio::test]
    async fn test_provider_load_failure_is_fatal() {
        let result = spawn_engine(
            2,
            || Err::<CountingProvider, _>(ProviderError::NoFace),
            PipelineConfig::default(),
        );
        assert!(matches!(result, Err(EngineError::Provider(ProviderError::NoFace))));
    }

    #[tokio::test]
    async fn test_reply_timeout() {
        let engine = spawn_engine(
            1,
            || {
                Ok(CountingProvider {
                    delay: Duration::from_millis(200),
                    ..CountingProvider::default()
                })
            },
            PipelineConfig::default(),
        )
        .unwrap();

        let err = engine
            .score(vec![textured_frame()], Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }
}
