// src/services/orchestrator.rs
use crate::config::FanOutConfig;
use crate::errors::OrchestrationError;
use crate::models::{GenerationOutcome, SessionId, SessionSnapshot};
use crate::services::aggregator::ResultAggregator;
use crate::services::analysis_client::StyleAnalyzer;
use crate::services::image_synthesizer::ClothingImageGenerator;
use futures_util::StreamExt;
use futures_util::stream;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Enforces a minimum gap between consecutive request starts.
struct StartSpacing {
    last_start: tokio::sync::Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl StartSpacing {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_start: tokio::sync::Mutex::new(None),
            min_interval,
        }
    }

    async fn wait(&self) {
        let mut last = self.last_start.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!("Spacing generation requests: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Drives analyze-then-generate sessions.
///
/// Only one session is active at a time. Starting a new one cancels the previous
/// session's token, which drops its in-flight requests; anything that still slips
/// through is rejected by the aggregator because it carries the old session id.
pub struct StyleOrchestrator {
    analyzer: Arc<dyn StyleAnalyzer>,
    generator: Arc<dyn ClothingImageGenerator>,
    aggregator: Arc<ResultAggregator>,
    fan_out: FanOutConfig,
    next_session: AtomicU64,
    active: Mutex<Option<(SessionId, CancellationToken)>>,
}

impl StyleOrchestrator {
    pub fn new(
        analyzer: Arc<dyn StyleAnalyzer>,
        generator: Arc<dyn ClothingImageGenerator>,
        aggregator: Arc<ResultAggregator>,
        fan_out: FanOutConfig,
    ) -> Self {
        Self {
            analyzer,
            generator,
            aggregator,
            fan_out,
            next_session: AtomicU64::new(0),
            active: Mutex::new(None),
        }
    }

    pub fn aggregator(&self) -> &Arc<ResultAggregator> {
        &self.aggregator
    }

    /// Starts a session in the background and returns its id immediately.
    pub fn start_analysis(self: &Arc<Self>, image: Vec<u8>) -> SessionId {
        let (session_id, token) = self.open_session();
        let this = Arc::clone(self);

        tokio::spawn(async move {
            match this.run_session(session_id, token, image).await {
                Ok(snapshot) => info!(
                    "Session {} reached {:?}",
                    session_id, snapshot.phase
                ),
                Err(OrchestrationError::Superseded(id)) => {
                    debug!("Session {} superseded", id)
                }
                Err(e) => warn!("Session {} ended: {}", session_id, e),
            }
        });

        session_id
    }

    /// Runs a full session and returns its terminal snapshot.
    pub async fn analyze(&self, image: Vec<u8>) -> Result<SessionSnapshot, OrchestrationError> {
        let (session_id, token) = self.open_session();
        self.run_session(session_id, token, image).await
    }

    /// Cancels the active session, if any, and returns the read model to idle.
    pub fn cancel(&self) -> Option<SessionId> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        let (session_id, token) = active.take()?;
        info!("Cancelling session {}", session_id);
        token.cancel();
        self.aggregator.reset();
        Some(session_id)
    }

    fn open_session(&self) -> (SessionId, CancellationToken) {
        let token = CancellationToken::new();

        // Ids are allocated under the lock so the newest id is always the active one.
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        let session_id = SessionId(self.next_session.fetch_add(1, Ordering::SeqCst) + 1);
        if let Some((previous, previous_token)) = active.replace((session_id, token.clone())) {
            info!(
                "Session {} replaces {}; cancelling pending work",
                session_id, previous
            );
            previous_token.cancel();
        }
        self.aggregator.begin(session_id);

        (session_id, token)
    }

    fn close_session(&self, session_id: SessionId) {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if matches!(*active, Some((id, _)) if id == session_id) {
            *active = None;
        }
    }

    async fn run_session(
        &self,
        session_id: SessionId,
        token: CancellationToken,
        image: Vec<u8>,
    ) -> Result<SessionSnapshot, OrchestrationError> {
        info!("Session {}: analyzing {} byte photo", session_id, image.len());

        let analysis = tokio::select! {
            _ = token.cancelled() => return Err(OrchestrationError::Superseded(session_id)),
            result = self.analyzer.analyze(&image) => result,
        };

        let analysis = match analysis {
            Ok(analysis) => analysis,
            Err(err) => {
                error!("Session {}: analysis failed: {}", session_id, err);
                self.aggregator.fail_analysis(session_id, &err);
                self.close_session(session_id);
                return Err(err.into());
            }
        };

        let descriptions: Vec<String> = analysis
            .items
            .iter()
            .map(|item| item.generation_description())
            .collect();

        if !self.aggregator.seed(session_id, analysis) {
            return Err(OrchestrationError::Superseded(session_id));
        }

        if !descriptions.is_empty() {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Session {}: generation cancelled", session_id);
                    return Err(OrchestrationError::Superseded(session_id));
                }
                _ = self.generate_all(session_id, &descriptions) => {}
            }
        }

        self.close_session(session_id);

        let snapshot = self.aggregator.snapshot();
        if snapshot.session_id != Some(session_id) {
            return Err(OrchestrationError::Superseded(session_id));
        }
        Ok(snapshot)
    }

    /// One generation per item, at most `max_concurrency` at once, with spaced starts.
    /// Each item records its own outcome; a failure never affects its siblings.
    async fn generate_all(&self, session_id: SessionId, descriptions: &[String]) {
        let total = descriptions.len();
        let limit = self.fan_out.max_concurrency.min(total).max(1);
        let spacing = StartSpacing::new(self.fan_out.min_spacing);
        let spacing = &spacing;

        stream::iter(descriptions.iter().enumerate())
            .for_each_concurrent(limit, |(index, description)| async move {
                spacing.wait().await;
                info!(
                    "Session {}: generating image {}/{}",
                    session_id,
                    index + 1,
                    total
                );

                let outcome = match self.generator.generate(description).await {
                    Ok(image_ref) => GenerationOutcome::Succeeded { image_ref },
                    Err(err) => {
                        warn!(
                            "Session {}: image for item {} failed: {}",
                            session_id,
                            index + 1,
                            err
                        );
                        GenerationOutcome::failed(&err)
                    }
                };

                self.aggregator.record(session_id, index, outcome);
            })
            .await;
    }
}
