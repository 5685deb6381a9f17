//! Single-worker request gate in front of the generation backend.
//!
//! Every component submits through [`RequestGate::invoke`]; jobs are queued
//! FIFO and a single worker task dispatches them one at a time, so at most
//! one backend call is ever in flight regardless of how many logical callers
//! exist. Each dispatch is preceded by a fixed spacing delay. Rate-limit
//! responses are retried with exponential backoff, other failures with a
//! fixed delay, three attempts total; exhaustion surfaces a [`GateError`]
//! to the caller. Every request, response and retry is appended to the run
//! log.

use crate::audit::{LogKind, RunLog};
use crate::client::{ClientError, GenerationClient, GenerationRequest};
use crate::errors::GateError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Total attempts per call, initial dispatch included.
const MAX_ATTEMPTS: u32 = 3;

/// Queue depth. Submissions beyond this apply backpressure to the caller,
/// which is harmless in a single-logical-thread pipeline.
const QUEUE_CAPACITY: usize = 64;

/// Gate tuning.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Fixed delay before every dispatched call.
    pub spacing: Duration,
    /// Base for exponential backoff after a rate-limit response.
    pub backoff_base: Duration,
    /// Fixed delay between retries of other transient failures.
    pub retry_delay: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            spacing: Duration::from_millis(500),
            backoff_base: Duration::from_millis(2000),
            retry_delay: Duration::from_millis(1500),
        }
    }
}

impl GateConfig {
    pub fn from_settings(settings: &crate::config::GateSettings) -> Self {
        Self {
            spacing: Duration::from_millis(settings.spacing_ms),
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
        }
    }

    pub fn with_spacing(mut self, spacing: Duration) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

struct Job {
    request: GenerationRequest,
    reply: oneshot::Sender<Result<String, GateError>>,
}

/// Cloneable handle to the gate's submission queue.
#[derive(Clone)]
pub struct RequestGate {
    tx: mpsc::Sender<Job>,
}

impl RequestGate {
    /// Spawn the worker task and return a handle. The worker exits when the
    /// last handle is dropped.
    pub fn start(
        client: Arc<dyn GenerationClient>,
        config: GateConfig,
        log: Arc<RunLog>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(worker(rx, client, config, log));
        Self { tx }
    }

    /// Submit a request and wait for its outcome. Requests are dispatched in
    /// submission order.
    pub async fn invoke(&self, request: GenerationRequest) -> Result<String, GateError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Job {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| GateError::ChannelClosed)?;
        reply_rx.await.map_err(|_| GateError::ChannelClosed)?
    }
}

async fn worker(
    mut rx: mpsc::Receiver<Job>,
    client: Arc<dyn GenerationClient>,
    config: GateConfig,
    log: Arc<RunLog>,
) {
    while let Some(job) = rx.recv().await {
        let result = dispatch(client.as_ref(), &config, &log, &job.request).await;
        // A caller that gave up waiting is not an error for the gate.
        let _ = job.reply.send(result);
    }
}

async fn dispatch(
    client: &dyn GenerationClient,
    config: &GateConfig,
    log: &RunLog,
    request: &GenerationRequest,
) -> Result<String, GateError> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        tokio::time::sleep(config.spacing).await;
        log.record(
            LogKind::Request,
            format!(
                "attempt {}/{} ({}): {}",
                attempt,
                MAX_ATTEMPTS,
                if request.json_mode { "json" } else { "text" },
                preview(&request.user)
            ),
        );

        match client.generate(request.clone()).await {
            Ok(text) => {
                log.record(
                    LogKind::Response,
                    format!("{} chars: {}", text.chars().count(), preview(&text)),
                );
                return Ok(text);
            }
            Err(ClientError::RateLimited) => {
                if attempt >= MAX_ATTEMPTS {
                    log.record(
                        LogKind::Failure,
                        format!("rate limit persisted across {} attempts", attempt),
                    );
                    return Err(GateError::RateLimited { attempts: attempt });
                }
                let delay = config.backoff_base * 2u32.saturating_pow(attempt - 1);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "backend rate limited, backing off"
                );
                log.record(
                    LogKind::Retry,
                    format!("rate limited, retrying in {}ms", delay.as_millis()),
                );
                tokio::time::sleep(delay).await;
            }
            Err(ClientError::Transient(message)) => {
                if attempt >= MAX_ATTEMPTS {
                    log.record(
                        LogKind::Failure,
                        format!("backend failed across {} attempts: {}", attempt, message),
                    );
                    return Err(GateError::Backend {
                        attempts: attempt,
                        message,
                    });
                }
                tracing::warn!(
                    attempt,
                    error = %message,
                    "backend call failed, retrying"
                );
                log.record(
                    LogKind::Retry,
                    format!("transient failure ({}), retrying", message),
                );
                tokio::time::sleep(config.retry_delay).await;
            }
        }
    }
}

/// First line, truncated, for log readability.
fn preview(text: &str) -> String {
    const MAX: usize = 120;
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= MAX {
        line.to_string()
    } else {
        let cut: String = line.chars().take(MAX).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Instant;

    struct FlakyClient {
        /// Outcomes popped front-to-back, one per generate() call.
        script: Mutex<Vec<Result<String, ClientError>>>,
        dispatched: Mutex<Vec<(Instant, String)>>,
    }

    impl FlakyClient {
        fn new(script: Vec<Result<String, ClientError>>) -> Self {
            Self {
                script: Mutex::new(script),
                dispatched: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GenerationClient for FlakyClient {
        async fn generate(&self, request: GenerationRequest) -> Result<String, ClientError> {
            self.dispatched
                .lock()
                .unwrap()
                .push((Instant::now(), request.user.clone()));
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok("ok".to_string())
            } else {
                script.remove(0)
            }
        }
    }

    fn fast_config() -> GateConfig {
        GateConfig::default()
            .with_spacing(Duration::from_millis(10))
            .with_backoff_base(Duration::from_millis(5))
            .with_retry_delay(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn success_passes_text_through() {
        let client = Arc::new(FlakyClient::new(vec![Ok("hello".into())]));
        let gate = RequestGate::start(client, fast_config(), Arc::new(RunLog::in_memory()));
        let text = gate
            .invoke(GenerationRequest::text("sys", "user"))
            .await
            .unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn rate_limit_retries_then_succeeds() {
        let client = Arc::new(FlakyClient::new(vec![
            Err(ClientError::RateLimited),
            Err(ClientError::RateLimited),
            Ok("third time".into()),
        ]));
        let log = Arc::new(RunLog::in_memory());
        let gate = RequestGate::start(client.clone(), fast_config(), log.clone());

        let text = gate
            .invoke(GenerationRequest::text("sys", "user"))
            .await
            .unwrap();
        assert_eq!(text, "third time");
        assert_eq!(client.dispatched.lock().unwrap().len(), 3);
        assert_eq!(log.request_count(), 3);
    }

    #[tokio::test]
    async fn rate_limit_exhaustion_surfaces_gate_error() {
        let client = Arc::new(FlakyClient::new(vec![
            Err(ClientError::RateLimited),
            Err(ClientError::RateLimited),
            Err(ClientError::RateLimited),
        ]));
        let gate = RequestGate::start(client, fast_config(), Arc::new(RunLog::in_memory()));

        let err = gate
            .invoke(GenerationRequest::text("sys", "user"))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::RateLimited { attempts: 3 }));
    }

    #[tokio::test]
    async fn transient_failure_retries_with_fixed_delay() {
        let client = Arc::new(FlakyClient::new(vec![
            Err(ClientError::Transient("boom".into())),
            Ok("recovered".into()),
        ]));
        let gate = RequestGate::start(client.clone(), fast_config(), Arc::new(RunLog::in_memory()));

        let text = gate
            .invoke(GenerationRequest::text("sys", "user"))
            .await
            .unwrap();
        assert_eq!(text, "recovered");
        assert_eq!(client.dispatched.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_submissions_dispatch_fifo_with_spacing() {
        let client = Arc::new(FlakyClient::new(vec![]));
        let spacing = Duration::from_millis(20);
        let config = GateConfig::default()
            .with_spacing(spacing)
            .with_backoff_base(Duration::from_millis(5))
            .with_retry_delay(Duration::from_millis(5));
        let gate = RequestGate::start(client.clone(), config, Arc::new(RunLog::in_memory()));

        let calls: Vec<_> = (0..4)
            .map(|i| {
                let gate = gate.clone();
                async move {
                    gate.invoke(GenerationRequest::text("sys", format!("req-{}", i)))
                        .await
                        .unwrap()
                }
            })
            .collect();
        futures::future::join_all(calls).await;

        let dispatched = client.dispatched.lock().unwrap();
        let order: Vec<&str> = dispatched.iter().map(|(_, u)| u.as_str()).collect();
        assert_eq!(order, vec!["req-0", "req-1", "req-2", "req-3"]);
        for pair in dispatched.windows(2) {
            assert!(pair[1].0.duration_since(pair[0].0) >= spacing);
        }
    }
}
