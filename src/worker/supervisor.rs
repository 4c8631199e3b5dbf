use std::{future::Future, time::Duration};

use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorReport {
    pub runs: u64,
    pub failures: u64,
    pub state: SupervisorState,
}

/// Keeps a worker alive until cancelled.
///
/// The worker is re-invoked from scratch after every return: after an error
/// it waits `backoff`, after a normal pass it waits `idle`. Workers resume from
/// their own checkpoints, so a restart never starts over from zero.
pub struct Supervisor {
    name: String,
    backoff: Duration,
    idle: Duration,
}

impl Supervisor {
    pub fn new(name: impl Into<String>, backoff: Duration, idle: Duration) -> Self {
        Self {
            name: name.into(),
            backoff,
            idle,
        }
    }

    pub fn from_settings(name: impl Into<String>, settings: &SupervisorSettings) -> Self {
        Self::new(
            name,
            Duration::from_secs(settings.backoff_secs),
            Duration::from_millis(settings.idle_ms),
        )
    }

    /// Sleep unless cancelled first. Returns the next state.
    async fn pause(&self, cancel: &CancellationToken, duration: Duration) -> SupervisorState {
        tokio::select! {
            _ = cancel.cancelled() => SupervisorState::Stopped,
            _ = tokio::time::sleep(duration) => SupervisorState::Running,
        }
    }

    pub async fn run<F, Fut>(&self, cancel: CancellationToken, mut worker: F) -> SupervisorReport
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let mut report = SupervisorReport {
            runs: 0,
            failures: 0,
            state: SupervisorState::Running,
        };

        while report.state == SupervisorState::Running {
            if cancel.is_cancelled() {
                report.state = SupervisorState::Stopped;
                break;
            }
            report.runs += 1;

            // In-flight work is dropped as soon as the token fires.
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    report.state = SupervisorState::Stopped;
                    break;
                },
                result = worker(cancel.child_token()) => result,
            };

            report.state = match result {
                Ok(()) => self.pause(&cancel, self.idle).await,
                Err(e) => {
                    report.failures += 1;
                    error!("[{}] Worker failed: {:#}", self.name, e);
                    info!("[{}] Restarting in {:?}", self.name, self.backoff);
                    self.pause(&cancel, self.backoff).await
                },
            };
        }

        info!(
            "[{}] Stopped after {} runs ({} failures)",
            self.name, report.runs, report.failures
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    };

    #[tokio::test(start_paused = true)]
    async fn restarts_after_failures_until_cancelled() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU64::new(0));
        let supervisor = Supervisor::new("test", Duration::from_secs(5), Duration::from_millis(500));

        let report = supervisor
            .run(cancel.clone(), |_| {
                let calls = calls.clone();
                let cancel = cancel.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        anyhow::bail!("node unreachable");
                    }
                    cancel.cancel();
                    Ok(())
                }
            })
            .await;

        assert_eq!(
            report,
            SupervisorReport {
                runs: 3,
                failures: 2,
                state: SupervisorState::Stopped
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_applied_between_failures() {
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new("test", Duration::from_secs(5), Duration::from_millis(500));
        let started = tokio::time::Instant::now();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            trigger.cancel();
        });
        let report = supervisor
            .run(cancel, |_| async { Err::<(), _>(anyhow::anyhow!("always failing")) })
            .await;

        // failures at t=0, 5 and 10
        assert_eq!(report.runs, 3);
        assert_eq!(report.failures, 3);
        assert!(started.elapsed() >= Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_in_flight_work() {
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new("test", Duration::from_secs(5), Duration::from_millis(500));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let report = supervisor
            .run(cancel, |_| async {
                futures::future::pending::<()>().await;
                Ok::<(), anyhow::Error>(())
            })
            .await;

        assert_eq!(report.runs, 1);
        assert_eq!(report.failures, 0);
        assert_eq!(report.state, SupervisorState::Stopped);
    }
}
