//! Warmup: synthetic traffic driven through the composed pipeline before the
//! server accepts real requests.
//!
//! Samples are dispatched through the same service the transport will use,
//! so lazy initialization happens and configuration mistakes surface before
//! `Ready`. Any failure, or any response rejected by a sample's check, is
//! fatal.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::StatusCode;
use thiserror::Error;
use tracing::{error, info};
use trellis_core::{Failure, HttpResponse};

use super::handler::Service;
use crate::protocol::{Http, Protocol};

// ---------------------------------------------------------------------------
// WarmupSample
// ---------------------------------------------------------------------------

type ResponseCheck<P> =
    Arc<dyn Fn(&<P as Protocol>::Response) -> Result<(), String> + Send + Sync>;

/// One named synthetic request, with an optional response check.
pub struct WarmupSample<P: Protocol> {
    name: String,
    request: P::Request,
    check: Option<ResponseCheck<P>>,
}

impl<P: Protocol> WarmupSample<P> {
    pub fn new(name: impl Into<String>, request: P::Request) -> Self {
        Self {
            name: name.into(),
            request,
            check: None,
        }
    }

    /// Rejects the warmup when `check` returns `Err(reason)`.
    #[must_use]
    pub fn with_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&P::Response) -> Result<(), String> + Send + Sync + 'static,
    {
        self.check = Some(Arc::new(check));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn request(&self) -> &P::Request {
        &self.request
    }
}

impl WarmupSample<Http> {
    /// Requires the response status to equal `status`.
    #[must_use]
    pub fn expect_status(self, status: StatusCode) -> Self {
        self.with_check(move |response: &HttpResponse| {
            if response.status == status {
                Ok(())
            } else {
                Err(format!("expected status {status}, got {}", response.status))
            }
        })
    }
}

impl<P: Protocol> Clone for WarmupSample<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            request: self.request.clone(),
            check: self.check.clone(),
        }
    }
}

impl<P: Protocol> fmt::Debug for WarmupSample<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmupSample")
            .field("name", &self.name)
            .field("request", &P::describe(&self.request))
            .field("has_check", &self.check.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// WarmupSource
// ---------------------------------------------------------------------------

/// Supplies the ordered samples dispatched during warmup.
pub trait WarmupSource<P: Protocol>: Send + Sync {
    fn samples(&self) -> Vec<WarmupSample<P>>;
}

impl<P: Protocol> WarmupSource<P> for Vec<WarmupSample<P>> {
    fn samples(&self) -> Vec<WarmupSample<P>> {
        self.clone()
    }
}

// ---------------------------------------------------------------------------
// WarmupError / WarmupReport
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WarmupError {
    #[error("warmup sample `{sample}` failed on iteration {iteration}: {failure}")]
    Dispatch {
        sample: String,
        iteration: usize,
        #[source]
        failure: Failure,
    },

    #[error("warmup sample `{sample}` was rejected on iteration {iteration}: {reason}")]
    Rejected {
        sample: String,
        iteration: usize,
        reason: String,
    },
}

/// Summary of a successful warmup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmupReport {
    pub dispatches: usize,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// WarmupRunner
// ---------------------------------------------------------------------------

/// Dispatches every sample, in order, `iterations` times.
#[derive(Debug, Clone, Copy)]
pub struct WarmupRunner {
    iterations: usize,
}

impl WarmupRunner {
    #[must_use]
    pub fn new(iterations: usize) -> Self {
        Self { iterations }
    }

    #[must_use]
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Runs the warmup against `target`, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns `Dispatch` when a sample fails and `Rejected` when a sample's
    /// check refuses the response.
    pub async fn run<P, S, W>(&self, target: &S, source: &W) -> Result<WarmupReport, WarmupError>
    where
        P: Protocol,
        S: Service<P> + ?Sized,
        W: WarmupSource<P> + ?Sized,
    {
        let samples = source.samples();
        let start = Instant::now();
        let mut dispatches = 0;

        info!(
            protocol = P::NAME,
            samples = samples.len(),
            iterations = self.iterations,
            "warmup starting"
        );

        for iteration in 1..=self.iterations {
            for sample in &samples {
                let response = match target.call(sample.request.clone()).await {
                    Ok(response) => response,
                    Err(failure) => {
                        error!(sample = %sample.name, iteration, error = %failure, "warmup dispatch failed");
                        return Err(WarmupError::Dispatch {
                            sample: sample.name.clone(),
                            iteration,
                            failure,
                        });
                    }
                };
                dispatches += 1;

                if let Some(check) = &sample.check {
                    if let Err(reason) = check(&response) {
                        error!(sample = %sample.name, iteration, %reason, "warmup response rejected");
                        return Err(WarmupError::Rejected {
                            sample: sample.name.clone(),
                            iteration,
                            reason,
                        });
                    }
                }
            }
        }

        let report = WarmupReport {
            dispatches,
            elapsed: start.elapsed(),
        };
        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = report.elapsed.as_millis() as u64;
        info!(protocol = P::NAME, dispatches, elapsed_ms, "warmup complete");
        Ok(report)
    }
}

impl Default for WarmupRunner {
    fn default() -> Self {
        Self::new(1)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
