//! Per-batch call state machine: rate-limit backoff, retries and model fallback.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{
    build_prompt, results_from_response, ExtractionConfig, ExtractionErrorType, ExtractionResult,
    SYSTEM_INSTRUCTION,
};
use crate::app::ports::{ClassifierResponse, ExtractionClassifier};
use crate::error::ClassifierError;
use crate::pipeline::processing::queue::QueueItem;

/// Where a batch is in its call lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum BatchState {
    Pending,
    /// Calling `models[model_idx]`; `attempt` counts calls to this model
    Calling {
        model_idx: usize,
        attempt: u32,
        backoff: Duration,
    },
    /// Rate limited; waiting `delay` before the next call to the same model
    Backoff {
        model_idx: usize,
        attempt: u32,
        delay: Duration,
    },
    Done(BatchEnd),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchEnd {
    Success {
        model: String,
        response: ClassifierResponse,
    },
    /// Every model was exhausted
    Failed {
        model: Option<String>,
        error_type: ExtractionErrorType,
        message: String,
    },
}

/// Results of one batch plus call accounting
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub results: Vec<ExtractionResult>,
    pub succeeded: bool,
    pub model_calls: BTreeMap<String, usize>,
    pub rate_limit_hits: usize,
    pub prompt_tokens: u64,
    pub output_tokens: u64,
    pub response_time: f64,
}

/// Queue items not yet present in `done_ids`, in queue order.
pub fn pending_items<'a>(queue: &'a [QueueItem], done_ids: &HashSet<String>) -> Vec<&'a QueueItem> {
    queue
        .iter()
        .filter(|item| !done_ids.contains(&item.review_id))
        .collect()
}

pub struct BatchExtractor {
    classifier: Arc<dyn ExtractionClassifier>,
    config: ExtractionConfig,
}

impl BatchExtractor {
    pub fn new(classifier: Arc<dyn ExtractionClassifier>, config: ExtractionConfig) -> Self {
        Self { classifier, config }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    fn initial_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.config.initial_backoff_secs.max(0.0))
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        let cap = Duration::from_secs_f64(self.config.max_backoff_secs.max(0.0));
        (current * 2).min(cap)
    }

    /// Fixed pause between batches that keeps calls under the RPM ceiling.
    pub fn inter_batch_delay(&self) -> Duration {
        if self.config.requests_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(60.0 / self.config.requests_per_minute as f64)
        }
    }

    /// Next state after a failed call.
    pub fn on_error(
        &self,
        model_idx: usize,
        attempt: u32,
        backoff: Duration,
        error: ClassifierError,
    ) -> BatchState {
        match error {
            ClassifierError::RateLimited(_) if attempt < self.config.max_retries.max(1) => {
                BatchState::Backoff {
                    model_idx,
                    attempt,
                    delay: backoff,
                }
            }
            ClassifierError::RateLimited(message) => {
                self.fall_back(model_idx, ExtractionErrorType::RateLimitError, message)
            }
            ClassifierError::Api(message) => {
                self.fall_back(model_idx, ExtractionErrorType::ApiError, message)
            }
        }
    }

    fn fall_back(
        &self,
        model_idx: usize,
        error_type: ExtractionErrorType,
        message: String,
    ) -> BatchState {
        let models = &self.config.models;
        if model_idx + 1 < models.len() {
            warn!(
                "Model {} gave up ({}); falling back to {}",
                models[model_idx],
                error_type.as_str(),
                models[model_idx + 1]
            );
            BatchState::Calling {
                model_idx: model_idx + 1,
                attempt: 1,
                backoff: self.initial_backoff(),
            }
        } else {
            BatchState::Done(BatchEnd::Failed {
                model: models.get(model_idx).cloned(),
                error_type,
                message,
            })
        }
    }

    /// Drives one batch to a terminal state. Never fails: exhausted retries
    /// become typed per-review failures.
    pub async fn process_batch(&self, batch: &[QueueItem]) -> BatchOutcome {
        let prompt = build_prompt(batch);
        let started = Instant::now();
        let mut outcome = BatchOutcome::default();

        let mut state = BatchState::Pending;
        let end = loop {
            state = match state {
                BatchState::Pending => BatchState::Calling {
                    model_idx: 0,
                    attempt: 1,
                    backoff: self.initial_backoff(),
                },
                BatchState::Calling {
                    model_idx,
                    attempt,
                    backoff,
                } => {
                    let Some(model) = self.config.models.get(model_idx) else {
                        break BatchEnd::Failed {
                            model: None,
                            error_type: ExtractionErrorType::ApiError,
                            message: "no classifier model configured".to_string(),
                        };
                    };
                    *outcome.model_calls.entry(model.clone()).or_insert(0) += 1;
                    debug!("Calling {} (attempt {}) for {} reviews", model, attempt, batch.len());

                    match self.classifier.classify(model, SYSTEM_INSTRUCTION, &prompt).await {
                        Ok(response) => BatchState::Done(BatchEnd::Success {
                            model: model.clone(),
                            response,
                        }),
                        Err(error) => {
                            if matches!(error, ClassifierError::RateLimited(_)) {
                                outcome.rate_limit_hits += 1;
                            } else {
                                warn!("Classifier call to {} failed: {}", model, error);
                            }
                            self.on_error(model_idx, attempt, backoff, error)
                        }
                    }
                }
                BatchState::Backoff {
                    model_idx,
                    attempt,
                    delay,
                } => {
                    warn!(
                        "Rate limited; retrying in {:.1}s (attempt {}/{})",
                        delay.as_secs_f64(),
                        attempt + 1,
                        self.config.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    BatchState::Calling {
                        model_idx,
                        attempt: attempt + 1,
                        backoff: self.next_backoff(delay),
                    }
                }
                BatchState::Done(end) => break end,
            };
        };

        outcome.response_time = started.elapsed().as_secs_f64();
        match end {
            BatchEnd::Success { model, response } => {
                outcome.succeeded = true;
                outcome.prompt_tokens = response.prompt_tokens.unwrap_or(0);
                outcome.output_tokens = response.output_tokens.unwrap_or(0);
                outcome.results = results_from_response(
                    batch,
                    &model,
                    &response.text,
                    response.prompt_tokens,
                    response.output_tokens,
                    outcome.response_time,
                );
            }
            BatchEnd::Failed {
                model,
                error_type,
                message,
            } => {
                warn!(
                    "Batch of {} reviews failed with {}: {}",
                    batch.len(),
                    error_type.as_str(),
                    message
                );
                outcome.results = batch
                    .iter()
                    .map(|item| {
                        ExtractionResult::failed(
                            item,
                            model.as_deref(),
                            error_type,
                            &message,
                            outcome.response_time,
                        )
                    })
                    .collect();
            }
        }
        outcome
    }
}
