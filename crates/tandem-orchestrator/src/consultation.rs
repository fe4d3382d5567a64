//! Consultation Handler (spec.md §4.6): a human-in-the-loop prompt with a
//! countdown and an AI-substitute fallback. The input reader and the
//! countdown timer race on a single-slot rendezvous; the loser is
//! cancelled (spec.md §5 "Consultation I/O").

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::inference::{ChatMessage, CompletionRequest, InferenceClient, InferenceError};
use crate::session::NoteSource;

const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_COUNTDOWN_MS: u64 = 15_000;

#[derive(Debug, Clone)]
pub struct ConsultationOptions {
    pub timeout_ms: u64,
    pub countdown_ms: u64,
    pub allow_ai_substitute: bool,
    pub mandatory: bool,
}

impl Default for ConsultationOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            countdown_ms: DEFAULT_COUNTDOWN_MS,
            allow_ai_substitute: true,
            mandatory: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationResponse {
    pub content: String,
    pub source: NoteSource,
}

#[derive(Debug, Error)]
pub enum ConsultationError {
    #[error("consultation timed out with no human input and no AI substitute permitted")]
    Missing,
    #[error("ai substitute query failed: {0}")]
    SubstituteFailed(#[from] InferenceError),
    #[error("consultation cancelled")]
    Cancelled,
}

/// Anything that can supply a human's answer to a consultation question.
/// In production this is stdin or a UI channel; tests supply a programmable
/// stub.
#[async_trait]
pub trait InputSource: Send + Sync {
    async fn read_answer(&self) -> Option<String>;
}

/// Observer notified when the countdown display should appear; purely a
/// UI hook, never consulted for control flow.
pub trait CountdownObserver: Send + Sync {
    fn on_countdown_started(&self, remaining_ms: u64);
}

pub struct NullCountdownObserver;
impl CountdownObserver for NullCountdownObserver {
    fn on_countdown_started(&self, _remaining_ms: u64) {}
}

pub struct ConsultationHandler<'a> {
    input: &'a dyn InputSource,
    model: &'a dyn InferenceClient,
    observer: &'a dyn CountdownObserver,
    substitute_model: String,
}

impl<'a> ConsultationHandler<'a> {
    pub fn new(
        input: &'a dyn InputSource,
        model: &'a dyn InferenceClient,
        observer: &'a dyn CountdownObserver,
        substitute_model: impl Into<String>,
    ) -> Self {
        Self {
            input,
            model,
            observer,
            substitute_model: substitute_model.into(),
        }
    }

    /// Run the full consultation flow, honoring `cancel` at every yield
    /// point (spec.md §5 "Cancellation").
    pub async fn request(
        &self,
        question: &str,
        options: ConsultationOptions,
        cancel: &CancellationToken,
    ) -> Result<ConsultationResponse, ConsultationError> {
        let (tx, rx) = oneshot::channel::<String>();
        let reader_cancel = cancel.child_token();
        let reader_cancel_for_task = reader_cancel.clone();
        let input = self.input;

        let reader_task = tokio::spawn(async move {
            tokio::select! {
                _ = reader_cancel_for_task.cancelled() => {}
                answer = input.read_answer() => {
                    if let Some(answer) = answer {
                        let _ = tx.send(answer);
                    }
                }
            }
        });

        let countdown_at = options
            .timeout_ms
            .saturating_sub(options.countdown_ms);
        let timeout = tokio::time::sleep(Duration::from_millis(options.timeout_ms));
        let countdown_delay = tokio::time::sleep(Duration::from_millis(countdown_at));

        tokio::pin!(timeout);
        tokio::pin!(countdown_delay);
        tokio::pin!(rx);

        let mut countdown_fired = countdown_at == 0;
        if countdown_fired {
            self.observer.on_countdown_started(options.countdown_ms);
        }

        let human_answer = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    reader_cancel.cancel();
                    let _ = reader_task.await;
                    return Err(ConsultationError::Cancelled);
                }
                _ = &mut countdown_delay, if !countdown_fired => {
                    countdown_fired = true;
                    self.observer.on_countdown_started(options.countdown_ms);
                }
                answer = &mut rx => {
                    break answer.ok();
                }
                _ = &mut timeout => {
                    break None;
                }
            }
        };

        reader_cancel.cancel();
        let _ = reader_task.await;

        if let Some(content) = human_answer {
            return Ok(ConsultationResponse {
                content,
                source: NoteSource::User,
            });
        }

        if options.allow_ai_substitute {
            let prompt = format!(
                "The human did not respond to this question in time: \"{question}\". \
                 Provide a reasonable default: approve if reasonable, or pick the standard \
                 approach if this is a preference question.",
            );
            let request = CompletionRequest {
                model: self.substitute_model.clone(),
                messages: vec![
                    ChatMessage::system("You stand in for an absent human reviewer."),
                    ChatMessage::user(prompt),
                ],
                max_tokens: None,
                temperature: None,
            };
            let content = self.model.complete(request).await?;
            return Ok(ConsultationResponse {
                content,
                source: NoteSource::AiSubstitute,
            });
        }

        if options.mandatory {
            return Err(ConsultationError::Missing);
        }

        Err(ConsultationError::Missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct NeverAnswers;
    #[async_trait]
    impl InputSource for NeverAnswers {
        async fn read_answer(&self) -> Option<String> {
            std::future::pending::<()>().await;
            None
        }
    }

    struct ImmediateAnswer(&'static str);
    #[async_trait]
    impl InputSource for ImmediateAnswer {
        async fn read_answer(&self) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    struct StubModel;
    #[async_trait]
    impl InferenceClient for StubModel {
        async fn stream_completion(
            &self,
            _request: CompletionRequest,
        ) -> Result<
            futures::stream::BoxStream<'static, Result<crate::inference::StreamChunk, InferenceError>>,
            InferenceError,
        > {
            use futures::stream;
            Ok(Box::pin(stream::empty()))
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<String, InferenceError> {
            Ok("standard approach".to_string())
        }

        async fn ping(&self) -> Result<(), InferenceError> {
            Ok(())
        }
    }

    struct RecordingObserver(AtomicBool);
    impl CountdownObserver for RecordingObserver {
        fn on_countdown_started(&self, _remaining_ms: u64) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn human_answer_wins_when_it_arrives_before_timeout() {
        let input = ImmediateAnswer("yes, proceed");
        let model = StubModel;
        let observer = NullCountdownObserver;
        let handler = ConsultationHandler::new(&input, &model, &observer, "coder-model");
        let cancel = CancellationToken::new();
        let response = handler
            .request(
                "should I proceed?",
                ConsultationOptions {
                    timeout_ms: 200,
                    countdown_ms: 50,
                    allow_ai_substitute: true,
                    mandatory: false,
                },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(response.source, NoteSource::User);
        assert_eq!(response.content, "yes, proceed");
    }

    #[tokio::test]
    async fn timeout_without_human_falls_back_to_ai_substitute() {
        let input = NeverAnswers;
        let model = StubModel;
        let observer = RecordingObserver(AtomicBool::new(false));
        let handler = ConsultationHandler::new(&input, &model, &observer, "coder-model");
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();
        let response = handler
            .request(
                "pick a default",
                ConsultationOptions {
                    timeout_ms: 40,
                    countdown_ms: 10,
                    allow_ai_substitute: true,
                    mandatory: false,
                },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(response.source, NoteSource::AiSubstitute);
        assert!(start.elapsed().as_millis() >= 40);
        assert!(observer.0.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn mandatory_without_substitute_raises_missing_error() {
        let input = NeverAnswers;
        let model = StubModel;
        let observer = NullCountdownObserver;
        let handler = ConsultationHandler::new(&input, &model, &observer, "coder-model");
        let cancel = CancellationToken::new();
        let result = handler
            .request(
                "confirm deploy",
                ConsultationOptions {
                    timeout_ms: 20,
                    countdown_ms: 5,
                    allow_ai_substitute: false,
                    mandatory: true,
                },
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(ConsultationError::Missing)));
    }
}
