use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::prometheus_metrics::ServiceSeries;

pub const MAX_ATTEMPT_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected status {status} from {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("Both endpoints exhausted; last error: {last_error}")]
    UpstreamUnavailable { last_error: Box<Error> },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == reqwest::StatusCode::NOT_FOUND)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateStats {
    pub active: usize,
    pub pending: usize,
    pub capacity: usize,
}

/// Bounded-parallelism gate in front of one upstream node.
pub struct Gate {
    semaphore: Semaphore,
    capacity: usize,
    pending: AtomicUsize,
}

impl Gate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Semaphore::new(capacity),
            capacity,
            pending: AtomicUsize::new(0),
        }
    }

    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("gate semaphore is never closed");
        self.pending.fetch_sub(1, Ordering::SeqCst);
        permit
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            active: self.capacity - self.semaphore.available_permits(),
            pending: self.pending.load(Ordering::SeqCst),
            capacity: self.capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Primary,
    Secondary,
}

impl NodeKind {
    pub fn other(&self) -> Self {
        match self {
            Self::Primary => Self::Secondary,
            Self::Secondary => Self::Primary,
        }
    }
}

pub struct EndpointConfig {
    pub base_url: String,
    pub concurrency: usize,
    pub retries: u32,
}

struct Endpoint {
    base_url: String,
    gate: Gate,
    retries: u32,
}

impl Endpoint {
    fn new(config: EndpointConfig) -> Self {
        let base_url = config
            .base_url
            .strip_suffix('/')
            .unwrap_or(&config.base_url)
            .to_owned();
        Self {
            base_url,
            gate: Gate::new(config.concurrency),
            retries: config.retries,
        }
    }
}

pub fn attempt_delay(base: Duration, failed_attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(failed_attempt))
        .min(MAX_ATTEMPT_DELAY)
}

/// Runs one logical request against the preferred node first, then the other,
/// with per-node concurrency gates and exponential backoff between attempts.
pub struct ReliableClient {
    primary: Endpoint,
    secondary: Endpoint,
    base_delay: Duration,
    metrics: ServiceSeries,
}

impl ReliableClient {
    pub fn new(
        primary: EndpointConfig,
        secondary: EndpointConfig,
        base_delay: Duration,
        metrics: ServiceSeries,
    ) -> Self {
        Self {
            primary: Endpoint::new(primary),
            secondary: Endpoint::new(secondary),
            base_delay,
            metrics,
        }
    }

    fn endpoint(&self, kind: NodeKind) -> &Endpoint {
        match kind {
            NodeKind::Primary => &self.primary,
            NodeKind::Secondary => &self.secondary,
        }
    }

    pub fn gate_stats(&self, kind: NodeKind) -> GateStats {
        self.endpoint(kind).gate.stats()
    }

    pub async fn request<T, F, Fut>(
        &self,
        prefer: NodeKind,
        label: &'static str,
        call: F,
    ) -> Result<T, Error>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        self.request_with_handler(prefer, label, call, |_| None).await
    }

    /// `error_handler` may short-circuit an attempt's error into a value
    /// (e.g. a 404 that means "slot missed"); that value is returned without
    /// further retries.
    pub async fn request_with_handler<T, F, Fut, H>(
        &self,
        prefer: NodeKind,
        label: &'static str,
        call: F,
        error_handler: H,
    ) -> Result<T, Error>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
        H: Fn(&Error) -> Option<T>,
    {
        let mut last_error: Option<Error> = None;
        for kind in [prefer, prefer.other()] {
            let endpoint = self.endpoint(kind);
            for attempt in 0..=endpoint.retries {
                if attempt > 0 {
                    self.metrics.retries.with_label_values(&[label]).inc();
                }
                self.metrics.calls.with_label_values(&[label]).inc();
                let result = {
                    let _permit = endpoint.gate.acquire().await;
                    call(endpoint.base_url.clone()).await
                };
                match result {
                    Ok(value) => return Ok(value),
                    Err(error) => {
                        if let Some(value) = error_handler(&error) {
                            tracing::debug!(call = label, node = ?kind, "Short-circuited upstream error: {error}");
                            return Ok(value);
                        }
                        tracing::warn!(call = label, node = ?kind, attempt, "Upstream call failed: {error}");
                        last_error = Some(error);
                        if attempt < endpoint.retries {
                            tokio::time::sleep(attempt_delay(self.base_delay, attempt)).await;
                        }
                    }
                }
            }
        }
        self.metrics.upstream_failures.with_label_values(&[label]).inc();
        let last_error = last_error.expect("at least one attempt ran per endpoint");
        Err(Error::UpstreamUnavailable {
            last_error: Box::new(last_error),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    use super::*;

    fn test_client(primary_retries: u32, secondary_retries: u32) -> ReliableClient {
        ReliableClient::new(
            EndpointConfig {
                base_url: "http://primary".to_owned(),
                concurrency: 4,
                retries: primary_retries,
            },
            EndpointConfig {
                base_url: "http://secondary".to_owned(),
                concurrency: 2,
                retries: secondary_retries,
            },
            Duration::from_millis(500),
            crate::prometheus_metrics::Metrics::new("test").services.consensus.clone(),
        )
    }

    fn status_error(url: &str) -> Error {
        Error::Status {
            url: url.to_owned(),
            status: reqwest::StatusCode::NOT_FOUND,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_preferred_then_other_endpoint() {
        let client = test_client(2, 1);
        let calls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&calls);
        let result: Result<(), Error> = client
            .request(NodeKind::Primary, "test_call", move |base| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(base.clone());
                    Err(status_error(&base))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::UpstreamUnavailable { .. })));
        let calls = calls.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            [
                "http://primary",
                "http://primary",
                "http://primary",
                "http://secondary",
                "http://secondary",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn preferring_secondary_reverses_the_order() {
        let client = test_client(0, 0);
        let calls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&calls);
        let result: Result<(), Error> = client
            .request(NodeKind::Secondary, "test_call", move |base| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(base.clone());
                    Err(status_error(&base))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            ["http://secondary", "http://primary"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn error_handler_short_circuits_without_retry() {
        let client = test_client(5, 5);
        let attempts = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&attempts);
        let result = client
            .request_with_handler(
                NodeKind::Primary,
                "test_call",
                move |base| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                        Err::<&str, _>(status_error(&base))
                    }
                },
                |error| error.is_not_found().then_some("missed"),
            )
            .await;

        assert_eq!(result.unwrap(), "missed");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_stops_the_sequence() {
        let client = test_client(3, 3);
        let attempts = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&attempts);
        let result = client
            .request(NodeKind::Primary, "test_call", move |base| {
                let seen = Arc::clone(&seen);
                async move {
                    let attempt = seen.fetch_add(1, Ordering::SeqCst);
                    if attempt == 1 {
                        Ok(base)
                    } else {
                        Err(status_error(&base))
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "http://primary");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn attempt_delay_doubles_and_caps() {
        let base = Duration::from_millis(500);
        assert_eq!(attempt_delay(base, 0), Duration::from_millis(500));
        assert_eq!(attempt_delay(base, 1), Duration::from_secs(1));
        assert_eq!(attempt_delay(base, 3), Duration::from_secs(4));
        assert_eq!(attempt_delay(base, 30), MAX_ATTEMPT_DELAY);
    }

    #[tokio::test]
    async fn gate_reports_active_and_capacity() {
        let gate = Gate::new(2);
        assert_eq!(
            gate.stats(),
            GateStats {
                active: 0,
                pending: 0,
                capacity: 2
            }
        );

        let first = gate.acquire().await;
        let _second = gate.acquire().await;
        assert_eq!(gate.stats().active, 2);

        drop(first);
        assert_eq!(gate.stats().active, 1);
        assert_eq!(gate.stats().capacity, 2);
    }
}
