use photomatch_core::{
    load_photo, DistanceMatcher, EncodeError, EncodedFace, MatchPipeline, MatchReport,
    OnnxFaceEncoder, PhotoError, PipelineError, PipelineOptions,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("encoder error: {0}")]
    Encoder(#[from] EncodeError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Photo(#[from] PhotoError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Find {
        reference: PathBuf,
        candidates: Vec<PathBuf>,
        tolerance: f32,
        options: PipelineOptions,
        reply: oneshot::Sender<Result<MatchReport, EngineError>>,
    },
    Encode {
        path: PathBuf,
        jitters: usize,
        reply: oneshot::Sender<Result<Vec<EncodedFace>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    cancel: Arc<AtomicBool>,
}

impl EngineHandle {
    /// Match every candidate against the reference face.
    pub async fn find(
        &self,
        reference: PathBuf,
        candidates: Vec<PathBuf>,
        tolerance: f32,
        options: PipelineOptions,
    ) -> Result<MatchReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Find {
                reference,
                candidates,
                tolerance,
                options,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Detect and embed every face in one photo.
    pub async fn encode(&self, path: PathBuf, jitters: usize) -> Result<Vec<EncodedFace>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Encode {
                path,
                jitters,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Ask a running `find` to stop before its next candidate.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models synchronously, so a missing model fails here
/// rather than on the first request.
pub fn spawn_engine(
    scrfd_path: &Path,
    arcface_path: &Path,
    intra_threads: usize,
) -> Result<EngineHandle, EngineError> {
    let mut encoder = OnnxFaceEncoder::load(scrfd_path, arcface_path, intra_threads)?;
    tracing::info!(
        scrfd = %scrfd_path.display(),
        arcface = %arcface_path.display(),
        intra_threads,
        "face models loaded"
    );

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let cancel = Arc::new(AtomicBool::new(false));
    let thread_cancel = Arc::clone(&cancel);

    std::thread::Builder::new()
        .name("photomatch-engine".into())
        .spawn(move || {
            tracing::debug!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Find {
                        reference,
                        candidates,
                        tolerance,
                        options,
                        reply,
                    } => {
                        thread_cancel.store(false, Ordering::Relaxed);
                        let mut pipeline =
                            MatchPipeline::new(&mut encoder, DistanceMatcher::new(tolerance), options);
                        let result = pipeline
                            .run(&reference, &candidates, &thread_cancel)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Encode {
                        path,
                        jitters,
                        reply,
                    } => {
                        let _ = reply.send(run_encode(&mut encoder, &path, jitters));
                    }
                }
            }
            tracing::debug!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, cancel })
}

/// Await `work`. If `interrupt` completes first, `on_interrupt` runs and `work`
/// is still awaited, so a cancelled run can report how far it got.
pub async fn finish_on_interrupt<T>(
    work: impl Future<Output = T>,
    interrupt: impl Future,
    on_interrupt: impl FnOnce(),
) -> T {
    tokio::pin!(work);
    tokio::select! {
        out = &mut work => out,
        _ = interrupt => {
            on_interrupt();
            work.await
        }
    }
}

fn run_encode(
    encoder: &mut OnnxFaceEncoder,
    path: &Path,
    jitters: usize,
) -> Result<Vec<EncodedFace>, EngineError> {
    let image = load_photo(path)?;
    let faces = encoder.encode_faces(&image, jitters)?;
    tracing::debug!(path = %path.display(), faces = faces.len(), "encode: done");
    Ok(faces)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_interrupt_cancels_and_waits_for_work() {
        let cancel = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&cancel);
        let work = async move {
            let mut processed = 0;
            while !seen.load(Ordering::Relaxed) {
                processed += 1;
                tokio::task::yield_now().await;
            }
            processed
        };

        let processed =
            finish_on_interrupt(work, std::future::ready(()), || cancel.store(true, Ordering::Relaxed))
                .await;

        assert!(cancel.load(Ordering::Relaxed));
        assert!(processed <= 1);
    }

    #[tokio::test]
    async fn test_work_finishing_first_skips_interrupt() {
        let mut interrupted = false;
        let out = finish_on_interrupt(
            async { 7 },
            std::future::pending::<()>(),
            || interrupted = true,
        )
        .await;

        assert_eq!(out, 7);
        assert!(!interrupted);
    }
}
