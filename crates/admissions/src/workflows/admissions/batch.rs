use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::{self, Interval, MissedTickBehavior};

use super::domain::AdmissionStage;

/// Number of per-item errors shown to operators before collapsing into a count.
pub const SURFACED_ERROR_LIMIT: usize = 5;

/// Throughput controls for batch progression against the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Upper bound on applications processed concurrently.
    pub max_in_flight: usize,
    /// Minimum spacing between item dispatches; zero disables pacing.
    pub dispatch_interval: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            dispatch_interval: Duration::from_millis(200),
        }
    }
}

impl BatchSettings {
    pub fn unpaced(max_in_flight: usize) -> Self {
        Self {
            max_in_flight,
            dispatch_interval: Duration::ZERO,
        }
    }

    fn pacer(&self) -> Option<Interval> {
        if self.dispatch_interval.is_zero() {
            return None;
        }
        let mut interval = time::interval(self.dispatch_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(interval)
    }
}

/// Run `task` over `items` with at most `max_in_flight` futures pending, releasing at most
/// one item per `dispatch_interval`. Outputs keep the input order.
pub(crate) async fn run_bounded<I, T, F, Fut>(
    items: Vec<I>,
    settings: &BatchSettings,
    task: F,
) -> Vec<T>
where
    F: FnMut(I) -> Fut,
    Fut: Future<Output = T>,
{
    let limit = settings.max_in_flight.max(1);
    let paced = stream::unfold(
        (items.into_iter(), settings.pacer()),
        |(mut remaining, mut pacer)| async move {
            let item = remaining.next()?;
            if let Some(interval) = pacer.as_mut() {
                interval.tick().await;
            }
            Some((item, (remaining, pacer)))
        },
    );

    paced.map(task).buffered(limit).collect().await
}

/// Why an application was left alone by a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "stage", rename_all = "snake_case")]
pub enum SkipReason {
    Draft,
    UnknownStage(AdmissionStage),
    Terminal(AdmissionStage),
    ManualStage(AdmissionStage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ItemResult {
    Advanced {
        from: AdmissionStage,
        to: AdmissionStage,
    },
    Skipped(SkipReason),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ItemOutcome {
    pub(crate) application_number: String,
    pub(crate) result: ItemResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItemError {
    pub application_number: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchAdvance {
    pub application_number: String,
    pub from: AdmissionStage,
    pub to: AdmissionStage,
}

/// Aggregate result of one batch progression run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub advanced: Vec<BatchAdvance>,
    pub errors: Vec<BatchItemError>,
}

impl BatchReport {
    pub(crate) fn from_outcomes(outcomes: Vec<ItemOutcome>) -> Self {
        outcomes
            .into_iter()
            .fold(Self::default(), |mut report, outcome| {
                match outcome.result {
                    ItemResult::Advanced { from, to } => {
                        report.succeeded += 1;
                        report.advanced.push(BatchAdvance {
                            application_number: outcome.application_number,
                            from,
                            to,
                        });
                    }
                    ItemResult::Skipped(_) => report.skipped += 1,
                    ItemResult::Failed(message) => {
                        report.failed += 1;
                        report.errors.push(BatchItemError {
                            application_number: outcome.application_number,
                            message,
                        });
                    }
                }
                report
            })
    }

    pub fn processed(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    pub fn surfaced_errors(&self) -> &[BatchItemError] {
        let end = self.errors.len().min(SURFACED_ERROR_LIMIT);
        &self.errors[..end]
    }

    pub fn overflow(&self) -> usize {
        self.errors.len().saturating_sub(SURFACED_ERROR_LIMIT)
    }

    /// Operator-facing summary: totals, the first few errors, then a count of the rest.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "{} advanced, {} failed, {} skipped",
            self.succeeded, self.failed, self.skipped
        )];
        lines.extend(
            self.surfaced_errors()
                .iter()
                .map(|error| format!("{}: {}", error.application_number, error.message)),
        );
        let overflow = self.overflow();
        if overflow > 0 {
            lines.push(format!("...and {overflow} more"));
        }
        lines
    }

    pub fn summary(&self) -> BatchSummaryView {
        BatchSummaryView {
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            advanced: self.advanced.clone(),
            errors: self.surfaced_errors().to_vec(),
            additional_errors: self.overflow(),
        }
    }
}

/// Capped view of a [`BatchReport`] for API responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummaryView {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub advanced: Vec<BatchAdvance>,
    pub errors: Vec<BatchItemError>,
    pub additional_errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn failed(number: usize) -> ItemOutcome {
        ItemOutcome {
            application_number: format!("APP-{number}"),
            result: ItemResult::Failed(format!("failure {number}")),
        }
    }

    #[test]
    fn report_caps_surfaced_errors_at_five() {
        let report = BatchReport::from_outcomes((1..=8).map(failed).collect());

        assert_eq!(report.failed, 8);
        assert_eq!(report.surfaced_errors().len(), 5);
        assert_eq!(report.overflow(), 3);
        let lines = report.summary_lines();
        assert_eq!(lines.first().map(String::as_str), Some("0 advanced, 8 failed, 0 skipped"));
        assert_eq!(lines.last().map(String::as_str), Some("...and 3 more"));
        assert_eq!(lines.len(), 7);
    }

    #[test]
    fn report_counts_each_outcome_kind() {
        let outcomes = vec![
            ItemOutcome {
                application_number: "APP-1".to_string(),
                result: ItemResult::Advanced {
                    from: AdmissionStage::OfferSent,
                    to: AdmissionStage::OfferAccepted,
                },
            },
            ItemOutcome {
                application_number: "APP-2".to_string(),
                result: ItemResult::Skipped(SkipReason::Terminal(AdmissionStage::Enrolled)),
            },
            failed(3),
        ];

        let report = BatchReport::from_outcomes(outcomes);
        assert_eq!((report.succeeded, report.failed, report.skipped), (1, 1, 1));
        assert_eq!(report.processed(), 3);
        assert_eq!(report.overflow(), 0);
        assert_eq!(report.summary().errors.len(), 1);
    }

    #[tokio::test]
    async fn bounded_runner_respects_limit_and_order() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let outputs = run_bounded((0..12).collect(), &BatchSettings::unpaced(3), |item: u32| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                item * 2
            }
        })
        .await;

        assert_eq!(outputs, (0..12).map(|item| item * 2).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn paced_runner_spaces_dispatches() {
        let settings = BatchSettings {
            max_in_flight: 8,
            dispatch_interval: Duration::from_millis(200),
        };
        let started = tokio::time::Instant::now();

        let stamps = run_bounded(vec![(); 4], &settings, |_| async move {
            tokio::time::Instant::now()
        })
        .await;

        let offsets: Vec<u128> = stamps
            .iter()
            .map(|stamp| stamp.duration_since(started).as_millis())
            .collect();
        assert_eq!(offsets, vec![0, 200, 400, 600]);
    }
}
