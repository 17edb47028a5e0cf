use crate::error::PipelineError;

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// A point in time a whole operation must finish by.
///
/// Every remote call in a path runs through [`Deadline::run`], so the steps of one path share
/// a single budget instead of each getting a fresh one.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    /// Runs `step`, aborting it with [`PipelineError::DeadlineExceeded`] once the deadline passes.
    pub async fn run<T, E, F>(&self, step: &'static str, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<PipelineError>,
    {
        match tokio::time::timeout_at(self.at, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => {
                tracing::warn!("Step '{}' exceeded deadline of {:?}", step, self.budget);
                Err(PipelineError::DeadlineExceeded {
                    step,
                    after: self.budget,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::ImageId;

    #[tokio::test]
    async fn test_fast_step_passes_through() {
        let deadline = Deadline::after(Duration::from_secs(1));

        let value = deadline
            .run("fast", async { Ok::<_, PipelineError>(7) })
            .await
            .unwrap();

        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_step_error_is_converted() {
        let deadline = Deadline::after(Duration::from_secs(1));
        let id = ImageId::new();

        let result = deadline
            .run("read", async move {
                Err::<(), _>(crate::ledger::types::LedgerError::NotFound(id))
            })
            .await;

        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_slow_step_is_aborted() {
        let deadline = Deadline::after(Duration::from_millis(20));

        let result = deadline
            .run("stuck", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, PipelineError>(())
            })
            .await;

        match result {
            Err(PipelineError::DeadlineExceeded { step, after }) => {
                assert_eq!(step, "stuck");
                assert_eq!(after, Duration::from_millis(20));
            }
            other => panic!("expected DeadlineExceeded, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_steps_share_one_budget() {
        let deadline = Deadline::after(Duration::from_millis(50));

        deadline
            .run("first", async {
                tokio::time::sleep(Duration::from_millis(35)).await;
                Ok::<_, PipelineError>(())
            })
            .await
            .unwrap();

        let second = deadline
            .run("second", async {
                tokio::time::sleep(Duration::from_millis(35)).await;
                Ok::<_, PipelineError>(())
            })
            .await;

        assert!(second.unwrap_err().is_deadline());
    }
}
