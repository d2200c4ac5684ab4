//! Event-type dispatch table.
//!
//! Handlers are registered per [`EventKind`]. A dispatch runs every payload
//! of an event independently and reports per-payload outcomes, so one bad
//! payload never hides the others.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::events::{EventKind, Payload, Provider};
use crate::queue::JobError;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), JobError>> + Send>>;

/// Handler for one event type.
pub type Handler = Arc<dyn Fn(Provider, Payload) -> HandlerFuture + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The parser knows the type but nothing is registered for it.
    #[error("no handler registered for {platform} event '{event_type}'")]
    UnsupportedEvent {
        platform: Provider,
        event_type: &'static str,
    },
}

/// Outcome of dispatching every payload of one event.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub succeeded: usize,
    /// Index into the payload list and the error it produced.
    pub failures: Vec<(usize, JobError)>,
}

impl DispatchReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failures.len()
    }

    /// Collapse into a single job outcome.
    ///
    /// Any retryable failure retries the job; handlers are idempotent so
    /// payloads that already succeeded are safe to run again. When every
    /// payload failed fatally the job is fatal. A partial fatal failure
    /// completes the job.
    pub fn into_job_result(self) -> Result<(), JobError> {
        if self.failures.is_empty() {
            return Ok(());
        }

        if let Some((index, err)) = self.failures.iter().find(|(_, e)| e.is_retryable()) {
            return Err(JobError::Retryable(format!("payload[{}]: {}", index, err.message())));
        }

        let summary = self
            .failures
            .iter()
            .map(|(i, e)| format!("payload[{}]: {}", i, e.message()))
            .collect::<Vec<_>>()
            .join("; ");

        if self.succeeded == 0 {
            return Err(JobError::Fatal(summary));
        }

        warn!(
            succeeded = self.succeeded,
            failed = self.failures.len(),
            "Some payloads failed permanently: {}",
            summary
        );
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct Dispatcher {
    handlers: HashMap<EventKind, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, kind: EventKind, handler: F) -> &mut Self
    where
        F: Fn(Provider, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |provider: Provider, payload: Payload| -> HandlerFuture {
            Box::pin(handler(provider, payload))
        });
        self.handlers.insert(kind, handler);
        self
    }

    pub fn handler(&self, provider: Provider, kind: EventKind) -> Result<&Handler, DispatchError> {
        self.handlers.get(&kind).ok_or_else(|| {
            let err = DispatchError::UnsupportedEvent {
                platform: provider,
                event_type: kind.as_str(),
            };
            error!(
                provider = %provider,
                event_type = kind.as_str(),
                "Event type is parsed but has no handler; check dispatcher wiring"
            );
            err
        })
    }

    pub async fn dispatch(
        &self,
        provider: Provider,
        kind: EventKind,
        payloads: Vec<Payload>,
    ) -> Result<DispatchReport, DispatchError> {
        let handler = self.handler(provider, kind)?;
        let mut report = DispatchReport::default();

        for (index, payload) in payloads.into_iter().enumerate() {
            let meeting_id = payload.meeting().meeting_id.clone();
            match handler(provider, payload).await {
                Ok(()) => {
                    debug!(event_type = kind.as_str(), index, meeting_id = %meeting_id, "Payload handled");
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!(
                        event_type = kind.as_str(),
                        index,
                        meeting_id = %meeting_id,
                        error = %e,
                        "Payload handler failed"
                    );
                    report.failures.push((index, e));
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MeetingInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn started(id: &str) -> Payload {
        Payload::MeetingStarted {
            meeting: MeetingInfo::new(id),
        }
    }

    #[tokio::test]
    async fn test_dispatch_runs_every_payload() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut dispatcher = Dispatcher::new();
        dispatcher.register(EventKind::MeetingStarted, move |_, payload| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if payload.meeting().meeting_id == "bad" {
                    Err(JobError::Fatal("broken".to_string()))
                } else {
                    Ok(())
                }
            }
        });

        let report = dispatcher
            .dispatch(
                Provider::Tencent,
                EventKind::MeetingStarted,
                vec![started("a"), started("bad"), started("c")],
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, 1);
        assert_eq!(report.total(), 3);
        // Partial fatal failure still completes the job.
        assert!(report.into_job_result().is_ok());
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_unsupported() {
        let dispatcher = Dispatcher::new();
        let err = dispatcher
            .dispatch(Provider::Tencent, EventKind::MeetingEnded, vec![started("a")])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::UnsupportedEvent {
                platform: Provider::Tencent,
                event_type: "meeting.ended",
            }
        );
    }

    #[test]
    fn test_report_collapse() {
        let report = DispatchReport {
            succeeded: 1,
            failures: vec![
                (1, JobError::Fatal("x".to_string())),
                (2, JobError::Retryable("busy".to_string())),
            ],
        };
        assert!(matches!(report.into_job_result(), Err(JobError::Retryable(_))));

        let report = DispatchReport {
            succeeded: 0,
            failures: vec![(0, JobError::Fatal("x".to_string()))],
        };
        assert!(matches!(report.into_job_result(), Err(JobError::Fatal(_))));

        assert!(DispatchReport::default().into_job_result().is_ok());
    }
}
