use crate::retry::RetryPolicy;
use crate::state::keys;
use crate::test_runner::TestReport;
use crate::workflow::phase::Phase;
use crate::workflow::session::Session;

impl Session {
    /// Generate tests, then run and repair them until they pass or the test
    /// cycle budget is spent.
    pub async fn test_cycle(&self) -> bool {
        if !self.phases.run(Phase::GenerateTests, None).await {
            tracing::warn!("Test generation failed, running the existing tests");
        }

        let policy = RetryPolicy::immediate(self.settings.max_test_cycles);
        let result = policy
            .run_with_recovery(
                move |attempt| async move { self.run_tests_once(attempt).await },
                move |attempt| async move {
                    if !self.phases.run(Phase::FixTests, None).await {
                        tracing::warn!(attempt, "Test repair failed, re-running tests anyway");
                    }
                },
            )
            .await;

        match result {
            Ok(()) => true,
            Err(exhausted) => {
                tracing::warn!(cycles = exhausted.attempts, "Tests still failing");
                false
            }
        }
    }

    /// One test run. The output is stored before the result is looked at so
    /// that the next repair phase sees this run's failures.
    async fn run_tests_once(&self, attempt: u32) -> Result<(), ()> {
        let report = match self.tests.run_tests().await {
            Ok(report) => report,
            Err(e) => TestReport::failed(format!("Test runner could not be executed: {e}")),
        };

        if let Err(e) = self.store.save(keys::LAST_TEST_OUTPUT, &report.output).await {
            tracing::warn!(error = %e, "Failed to store test output");
        }

        if report.passed {
            tracing::info!(attempt, "Tests passed");
            Ok(())
        } else {
            tracing::warn!(attempt, "Tests failed");
            Err(())
        }
    }
}
