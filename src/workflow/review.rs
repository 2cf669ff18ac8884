use std::sync::Mutex;

use crate::retry::RetryPolicy;
use crate::state::{keys, StateStore};
use crate::workflow::phase::Phase;
use crate::workflow::session::Session;

/// Outcome of a review phase, read from the sentinel files the agent leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewVerdict {
    Passed,
    Failed(String),
    /// The reviewer wrote neither sentinel.
    Unknown,
}

impl ReviewVerdict {
    pub async fn read(store: &StateStore) -> Self {
        if store.contains(keys::REVIEW_PASSED).await {
            return ReviewVerdict::Passed;
        }
        if store.contains(keys::REVIEW_FEEDBACK).await {
            let feedback = store.load(keys::REVIEW_FEEDBACK, "").await;
            return ReviewVerdict::Failed(feedback.trim().to_string());
        }
        ReviewVerdict::Unknown
    }
}

/// Result of [`Session::review_cycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub passed: bool,
    /// Result of the last test cycle run after a re-implementation, if any.
    pub retested: Option<bool>,
}

impl Session {
    /// Run the implement phase for review cycle `cycle` (1-based).
    ///
    /// From the second cycle on, the feedback of the previous review is handed
    /// to the agent as extra context.
    pub async fn implement(&self, cycle: u32) -> bool {
        let feedback = if cycle > 1 {
            self.store.load(keys::LAST_REVIEW_FEEDBACK, "").await
        } else {
            String::new()
        };

        let extra = if feedback.trim().is_empty() {
            None
        } else {
            Some(format!("Previous review feedback:\n{}", feedback.trim()))
        };

        self.phases.run(Phase::Implement, extra.as_deref()).await
    }

    /// Review the change; on rejection re-implement with the feedback and
    /// re-test, until the review passes or the review budget is spent.
    pub async fn review_cycle(&self) -> ReviewOutcome {
        let retested = Mutex::new(None);
        let retested_ref = &retested;
        let policy = RetryPolicy::immediate(self.settings.max_review_cycles);
        let result = policy
            .run_with_recovery(
                move |attempt| async move { self.review_once(attempt).await },
                move |attempt| async move {
                    if !self.implement(attempt + 1).await {
                        tracing::warn!(cycle = attempt + 1, "Re-implementation failed");
                    }
                    let tests_passed = self.test_cycle().await;
                    if !tests_passed {
                        tracing::warn!(cycle = attempt + 1, "Tests failing after re-implementation");
                    }
                    if let Ok(mut slot) = retested_ref.lock() {
                        *slot = Some(tests_passed);
                    }
                },
            )
            .await;

        let passed = match result {
            Ok(()) => true,
            Err(exhausted) => {
                tracing::warn!(cycles = exhausted.attempts, "Review did not pass");
                false
            }
        };
        let retested = retested.into_inner().unwrap_or_default();
        ReviewOutcome { passed, retested }
    }

    async fn review_once(&self, attempt: u32) -> Result<(), ()> {
        self.store
            .clear(&[keys::REVIEW_PASSED, keys::REVIEW_FEEDBACK])
            .await;

        if !self.phases.run(Phase::Review, None).await {
            tracing::warn!(attempt, "Review phase failed");
            return Err(());
        }

        match ReviewVerdict::read(&self.store).await {
            ReviewVerdict::Passed => {
                tracing::info!(attempt, "Review passed");
                Ok(())
            }
            ReviewVerdict::Failed(feedback) => {
                tracing::info!(attempt, "Review requested changes");
                if let Err(e) = self.store.save(keys::LAST_REVIEW_FEEDBACK, &feedback).await {
                    tracing::warn!(error = %e, "Failed to store review feedback");
                }
                Err(())
            }
            ReviewVerdict::Unknown => {
                tracing::warn!(attempt, "Review produced no verdict, treating it as passed");
                Ok(())
            }
        }
    }
}
