use rollcall_core::{
    check_orientation, AttendanceRecorder, CapturedImage, CheckInContext, EnrollOutcome,
    EnrollRequest, Enrollment, ErrorKind, FaceEmbedder, Orientation, PipelineConfig,
    PipelineError, Recognition, RecognitionOutcome,
};
use rollcall_store::{Database, FsImageStore};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("face engine did not answer within {0:?}")]
    Timeout(Duration),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Pipeline(err) => err.kind(),
            EngineError::Timeout(_) => ErrorKind::Timeout,
            EngineError::ChannelClosed | EngineError::Spawn(_) => ErrorKind::StorageFailure,
        }
    }
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    CheckFace {
        image: CapturedImage,
        span: tracing::Span,
        reply: oneshot::Sender<Option<Orientation>>,
    },
    Enroll {
        request: EnrollRequest,
        span: tracing::Span,
        reply: oneshot::Sender<Result<EnrollOutcome, PipelineError>>,
    },
    Recognize {
        image: CapturedImage,
        context: CheckInContext,
        span: tracing::Span,
        reply: oneshot::Sender<RecognitionOutcome>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        request: EngineRequest,
        reply_rx: oneshot::Receiver<T>,
    ) -> Result<T, EngineError> {
        // One budget covers queueing and the reply. Dropping `reply_rx` on
        // timeout closes the reply channel, which the engine checks.
        let exchange = async {
            self.tx
                .send(request)
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)
        };
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(reply) => reply,
            Err(_) => Err(EngineError::Timeout(self.timeout)),
        }
    }

    /// Orientation of the face in `image`; `None` when no face is found,
    /// the engine is unavailable or the call times out.
    pub async fn check_face(&self, image: CapturedImage) -> Option<Orientation> {
        let (reply, reply_rx) = oneshot::channel();
        let request = EngineRequest::CheckFace {
            image,
            span: tracing::Span::current(),
            reply,
        };
        match self.call(request, reply_rx).await {
            Ok(orientation) => orientation,
            Err(err) => {
                tracing::warn!(error = %err, "check-face failed closed");
                None
            }
        }
    }

    /// Run an enrollment. A timeout drops the request if the engine has not
    /// started it; an enrollment already running is completed.
    pub async fn enroll(&self, request: EnrollRequest) -> Result<EnrollOutcome, EngineError> {
        let (reply, reply_rx) = oneshot::channel();
        let request = EngineRequest::Enroll {
            request,
            span: tracing::Span::current(),
            reply,
        };
        Ok(self.call(request, reply_rx).await??)
    }

    /// Identify the face in `image` and record attendance. Engine failures
    /// and timeouts come back as `NoFaceDetected`.
    pub async fn recognize(&self, image: CapturedImage, context: CheckInContext) -> RecognitionOutcome {
        let (reply, reply_rx) = oneshot::channel();
        let request = EngineRequest::Recognize {
            image,
            context,
            span: tracing::Span::current(),
            reply,
        };
        match self.call(request, reply_rx).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(error = %err, "recognize failed closed");
                RecognitionOutcome::NoFaceDetected
            }
        }
    }
}

/// Everything the engine thread owns.
pub struct Engine {
    pub embedder: Box<dyn FaceEmbedder>,
    pub db: Arc<Database>,
    pub images: Arc<FsImageStore>,
    pub config: Arc<PipelineConfig>,
}

impl Engine {
    fn handle(&self, request: EngineRequest) {
        match request {
            EngineRequest::CheckFace { image, span, reply } => {
                let _entered = span.enter();
                if reply.is_closed() {
                    tracing::debug!("check-face abandoned by caller; skipped");
                    return;
                }
                let orientation = check_orientation(
                    self.embedder.as_ref(),
                    &image.gray,
                    self.config.orientation_offset,
                );
                let _ = reply.send(orientation);
            }
            EngineRequest::Enroll { request, span, reply } => {
                let _entered = span.enter();
                if reply.is_closed() {
                    tracing::warn!(person_id = %request.person_id, "enrollment abandoned by caller; skipped");
                    return;
                }
                let enrollment = Enrollment::new(
                    self.embedder.as_ref(),
                    self.db.as_ref(),
                    self.db.as_ref(),
                    self.images.as_ref(),
                    &self.config,
                );
                let _ = reply.send(enrollment.enroll(request));
            }
            EngineRequest::Recognize {
                image,
                context,
                span,
                reply,
            } => {
                let _entered = span.enter();
                if reply.is_closed() {
                    tracing::debug!("recognize abandoned by caller; skipped");
                    return;
                }
                let outcome = {
                    let abandoned = || reply.is_closed();
                    let recorder = AttendanceRecorder::new(self.db.as_ref(), self.db.as_ref(), &self.config);
                    Recognition::new(
                        self.embedder.as_ref(),
                        self.db.as_ref(),
                        self.db.as_ref(),
                        recorder,
                        &self.config,
                    )
                    .abandon_when(&abandoned)
                    .recognize(&image, context)
                };
                let _ = reply.send(outcome);
            }
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Requests are served one at a time, so enrollments and recognitions never
/// run inference concurrently.
pub fn spawn_engine(engine: Engine, timeout: Duration) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(request) = rx.blocking_recv() {
                engine.handle(request);
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx, timeout })
}
