//! Health check engine: bounded-retry liveness probe against an HTTP endpoint.
//!
//! Any HTTP response counts as alive. The engine only needs evidence that
//! something is listening and speaking HTTP, not that the answer is
//! meaningful, which keeps it decoupled from the backend's API surface.
//!
//! The engine reports progress through [`HealthObserver`] and never
//! depends on how (or whether) that progress is shown.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use garrison_telemetry::{log_health_exhausted, log_health_retry};

use crate::endpoint::Endpoint;

/// Retry budget for one health-check session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    /// Attempts before giving up (default: 30). Zero is treated as one.
    pub max_attempts: u32,
    /// Pause between attempts (default: 500ms).
    pub interval: Duration,
    /// Bound on a single attempt (default: 5s).
    pub per_attempt_timeout: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_millis(500),
            per_attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl HealthPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout;
        self
    }
}

/// Progress of a health-check session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// The first attempt of the session failed.
    FirstFailure { endpoint: Endpoint },
    /// A later attempt failed and another one is scheduled.
    Retrying {
        endpoint: Endpoint,
        attempt: u32,
        max_attempts: u32,
    },
    /// The endpoint answered.
    Success { endpoint: Endpoint, attempts: u32 },
    /// The retry budget is spent.
    Exhausted { endpoint: Endpoint, attempts: u32 },
}

impl HealthEvent {
    pub fn endpoint(&self) -> &Endpoint {
        match self {
            HealthEvent::FirstFailure { endpoint }
            | HealthEvent::Retrying { endpoint, .. }
            | HealthEvent::Success { endpoint, .. }
            | HealthEvent::Exhausted { endpoint, .. } => endpoint,
        }
    }
}

/// Subscriber to health-check progress.
pub trait HealthObserver {
    fn on_event(&mut self, event: &HealthEvent);
}

/// Observer that ignores everything (developer-facing checks).
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl HealthObserver for Silent {
    fn on_event(&mut self, _event: &HealthEvent) {}
}

impl<F: FnMut(&HealthEvent)> HealthObserver for F {
    fn on_event(&mut self, event: &HealthEvent) {
        self(event)
    }
}

/// A single failed attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// Errors from the health check engine.
#[derive(Debug, Error)]
pub enum HealthError {
    /// Every attempt failed.
    #[error("{endpoint} did not respond after {attempts} attempt(s)")]
    Exhausted {
        endpoint: Endpoint,
        attempts: u32,
        #[source]
        last_error: ProbeError,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// One liveness attempt against an endpoint.
pub trait Probe: Send + Sync {
    fn probe(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), ProbeError>> + Send;
}

/// Production probe: `GET http://host:port/`, any status is success.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self, HealthError> {
        // Proxies would turn a dead loopback backend into a live proxy answer.
        let client = reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

impl Probe for HttpProbe {
    async fn probe(&self, endpoint: &Endpoint, timeout: Duration) -> Result<(), ProbeError> {
        match self.client.get(endpoint.url()).timeout(timeout).send().await {
            Ok(resp) => {
                tracing::trace!(endpoint = %endpoint, status = %resp.status(), "probe answered");
                Ok(())
            }
            Err(e) if e.is_timeout() => Err(ProbeError::Timeout(timeout)),
            Err(e) => Err(ProbeError::Connect(e.to_string())),
        }
    }
}

/// State of one wait on one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckSession {
    pub endpoint: Endpoint,
    /// Failed attempts so far.
    pub attempt: u32,
    pub max_attempts: u32,
    pub interval: Duration,
    pub per_attempt_timeout: Duration,
}

impl HealthCheckSession {
    fn new(endpoint: Endpoint, policy: &HealthPolicy) -> Self {
        Self {
            endpoint,
            attempt: 0,
            max_attempts: policy.max_attempts.max(1),
            interval: policy.interval,
            per_attempt_timeout: policy.per_attempt_timeout,
        }
    }

    /// Record a failed attempt and return the events it produces.
    fn record_failure(&mut self) -> Vec<HealthEvent> {
        self.attempt += 1;
        let mut events = Vec::with_capacity(2);

        if self.attempt == 1 {
            events.push(HealthEvent::FirstFailure {
                endpoint: self.endpoint.clone(),
            });
        }

        if self.is_exhausted() {
            events.push(HealthEvent::Exhausted {
                endpoint: self.endpoint.clone(),
                attempts: self.attempt,
            });
        } else if self.attempt > 1 {
            events.push(HealthEvent::Retrying {
                endpoint: self.endpoint.clone(),
                attempt: self.attempt,
                max_attempts: self.max_attempts,
            });
        }

        events
    }

    fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Health check engine bound to a probe and a retry policy.
pub struct HealthCheck<P> {
    probe: P,
    policy: HealthPolicy,
}

impl<P: Probe> HealthCheck<P> {
    pub fn new(probe: P, policy: HealthPolicy) -> Self {
        Self { probe, policy }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Poll `endpoint` until it answers or the retry budget is spent.
    ///
    /// Suspends on a timer between attempts and never after the last one.
    /// Dropping the returned future cancels the session.
    pub async fn await_ready(
        &self,
        endpoint: &Endpoint,
        observer: &mut (dyn HealthObserver + Send),
    ) -> Result<(), HealthError> {
        let mut session = HealthCheckSession::new(endpoint.clone(), &self.policy);

        loop {
            let outcome = match tokio::time::timeout(
                session.per_attempt_timeout,
                self.probe.probe(endpoint, session.per_attempt_timeout),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProbeError::Timeout(session.per_attempt_timeout)),
            };

            let error = match outcome {
                Ok(()) => {
                    tracing::debug!(
                        endpoint = %endpoint,
                        attempts = session.attempt + 1,
                        "endpoint is healthy"
                    );
                    observer.on_event(&HealthEvent::Success {
                        endpoint: endpoint.clone(),
                        attempts: session.attempt + 1,
                    });
                    return Ok(());
                }
                Err(e) => e,
            };

            for event in session.record_failure() {
                observer.on_event(&event);
            }

            if session.is_exhausted() {
                log_health_exhausted!(
                    endpoint = %endpoint,
                    attempts = session.attempt,
                    error = %error,
                    "health check exhausted"
                );
                return Err(HealthError::Exhausted {
                    endpoint: endpoint.clone(),
                    attempts: session.attempt,
                    last_error: error,
                });
            }

            log_health_retry!(
                endpoint = %endpoint,
                attempt = session.attempt,
                max_attempts = session.max_attempts,
                error = %error,
                "health check attempt failed"
            );
            tokio::time::sleep(session.interval).await;
        }
    }
}
