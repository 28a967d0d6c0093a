// Ranging Lifecycle Controller - drives the measurement run against the connected peer
// Exactly one run exists at a time; invalidation replaces it wholesale

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::provider::RangingProvider;
use crate::token::RangingToken;
use crate::types::{Direction, RangingRun, RunState};

pub struct RangingController {
    provider: Arc<dyn RangingProvider>,
    run: RangingRun,
}

impl RangingController {
    pub fn new(provider: Arc<dyn RangingProvider>) -> Self {
        Self {
            provider,
            run: RangingRun::new(),
        }
    }

    pub fn run(&self) -> &RangingRun {
        &self.run
    }

    /// Start, or re-run, measurement with the peer's token
    ///
    /// Also used when a fresh remote token arrives while already active:
    /// the provider re-runs with the new token.
    pub async fn start_run(&mut self, remote: &RangingToken) -> Result<()> {
        let local = self.provider.local_token().await?;
        self.provider.start_run(&local, remote).await?;

        if self.run.state != RunState::Active {
            info!("Ranging run {} active", self.run.run_id);
        }
        self.run.state = RunState::Active;
        self.run.started_at = Some(Utc::now());
        Ok(())
    }

    /// Pause measurement; tokens and the peer connection stay intact
    pub fn suspend(&mut self) {
        if self.run.state == RunState::Active {
            info!("Ranging run {} suspended", self.run.run_id);
            self.run.state = RunState::Suspended;
        } else {
            debug!("Suspension signal with no active run");
        }
    }

    /// Resume after a suspension
    ///
    /// Returns true when the run restarted with the retained token; false
    /// when no token is available and the run stays down until one arrives.
    pub async fn resume(&mut self, remote: Option<&RangingToken>) -> Result<bool> {
        match remote {
            Some(token) => {
                info!("Resuming ranging run with the retained peer token");
                self.start_run(token).await?;
                Ok(true)
            }
            None => {
                debug!("No peer token retained, waiting for a fresh exchange");
                self.run.state = RunState::NotStarted;
                Ok(false)
            }
        }
    }

    /// Record a measurement
    pub fn handle_measurement(&mut self, distance: f32, direction: Option<Direction>) {
        debug!("Measurement: {:.2}m, direction: {:?}", distance, direction);
        self.run.last_distance = Some(distance);
        self.run.last_direction = direction;
    }

    /// Mark the current run dead; the restart path replaces it immediately
    pub fn invalidate(&mut self) {
        warn!("Ranging run {} invalidated", self.run.run_id);
        self.run.state = RunState::Invalidated;
    }

    /// Replace the invalidated run with a fresh one
    pub fn reset(&mut self) {
        self.run = RangingRun::new();
        debug!("Fresh ranging run: {}", self.run.run_id);
    }

    /// Best-effort teardown of the provider's run context
    pub async fn stop_run(&self) -> Result<()> {
        self.provider.stop_run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RangingError;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    struct RunRecorder {
        generation: AtomicU32,
        runs: Mutex<Vec<(RangingToken, RangingToken)>>,
        fail_start: AtomicBool,
    }

    impl RunRecorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                generation: AtomicU32::new(0),
                runs: Mutex::new(Vec::new()),
                fail_start: AtomicBool::new(false),
            })
        }

        fn runs(&self) -> Vec<(RangingToken, RangingToken)> {
            self.runs.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RangingProvider for RunRecorder {
        fn is_supported(&self) -> bool {
            true
        }

        async fn local_token(&self) -> Result<RangingToken> {
            let generation = self.generation.load(Ordering::SeqCst);
            Ok(RangingToken::new(format!("local-{}", generation).into_bytes()))
        }

        async fn start_run(&self, local: &RangingToken, remote: &RangingToken) -> Result<()> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(RangingError::Provider("start failed".to_string()));
            }
            self.runs
                .lock()
                .unwrap()
                .push((local.clone(), remote.clone()));
            Ok(())
        }

        async fn stop_run(&self) -> Result<()> {
            self.generation.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_start_run_goes_active_with_both_tokens() {
        let provider = RunRecorder::new();
        let mut controller = RangingController::new(provider.clone());
        let remote = RangingToken::new(vec![1, 2]);

        controller.start_run(&remote).await.unwrap();

        assert_eq!(controller.run().state, RunState::Active);
        assert!(controller.run().started_at.is_some());
        let runs = provider.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].1, remote);
    }

    #[tokio::test]
    async fn test_failed_start_leaves_the_run_down() {
        let provider = RunRecorder::new();
        provider.fail_start.store(true, Ordering::SeqCst);
        let mut controller = RangingController::new(provider.clone());

        let result = controller.start_run(&RangingToken::new(vec![1])).await;

        assert!(result.is_err());
        assert_eq!(controller.run().state, RunState::NotStarted);
    }

    #[tokio::test]
    async fn test_suspend_only_pauses_an_active_run() {
        let provider = RunRecorder::new();
        let mut controller = RangingController::new(provider.clone());

        controller.suspend();
        assert_eq!(controller.run().state, RunState::NotStarted);

        controller.start_run(&RangingToken::new(vec![1])).await.unwrap();
        controller.suspend();
        assert_eq!(controller.run().state, RunState::Suspended);
    }

    #[tokio::test]
    async fn test_resume_restarts_with_the_retained_token() {
        let provider = RunRecorder::new();
        let mut controller = RangingController::new(provider.clone());
        let remote = RangingToken::new(vec![1, 2]);
        controller.start_run(&remote).await.unwrap();
        controller.suspend();

        let restarted = controller.resume(Some(&remote)).await.unwrap();

        assert!(restarted);
        assert_eq!(controller.run().state, RunState::Active);
        assert_eq!(provider.runs().len(), 2, "resume re-runs the provider");
        assert_eq!(provider.runs()[1].1, remote);
    }

    #[tokio::test]
    async fn test_resume_without_a_token_waits() {
        let provider = RunRecorder::new();
        let mut controller = RangingController::new(provider.clone());
        controller.start_run(&RangingToken::new(vec![1])).await.unwrap();
        controller.suspend();

        let restarted = controller.resume(None).await.unwrap();

        assert!(!restarted);
        assert_eq!(controller.run().state, RunState::NotStarted);
        assert_eq!(provider.runs().len(), 1);
    }

    #[tokio::test]
    async fn test_measurements_update_the_run() {
        let provider = RunRecorder::new();
        let mut controller = RangingController::new(provider);

        controller.handle_measurement(1.5, Some(Direction { x: 0.3, y: 0.0, z: -0.9 }));

        assert_eq!(controller.run().last_distance, Some(1.5));
        assert!(controller.run().last_direction.is_some());

        // Direction may disappear while distance keeps updating
        controller.handle_measurement(1.2, None);
        assert_eq!(controller.run().last_distance, Some(1.2));
        assert!(controller.run().last_direction.is_none());
    }

    #[tokio::test]
    async fn test_reset_replaces_the_run_wholesale() {
        let provider = RunRecorder::new();
        let mut controller = RangingController::new(provider);
        controller.start_run(&RangingToken::new(vec![1])).await.unwrap();
        controller.handle_measurement(2.0, None);
        let old_id = controller.run().run_id;

        controller.invalidate();
        assert_eq!(controller.run().state, RunState::Invalidated);

        controller.reset();
        let run = controller.run();
        assert_ne!(run.run_id, old_id);
        assert_eq!(run.state, RunState::NotStarted);
        assert!(run.last_distance.is_none());
        assert!(run.last_direction.is_none());
    }

    #[tokio::test]
    async fn test_stop_run_rotates_the_provider_context() {
        let provider = RunRecorder::new();
        let controller = RangingController::new(provider.clone());

        let before = provider.local_token().await.unwrap();
        controller.stop_run().await.unwrap();
        let after = provider.local_token().await.unwrap();

        assert_ne!(before, after, "a fresh context yields a fresh token");
    }
}
