//! Payment gateway trait and stand-in implementations.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use domain::{Amount, Order};
use thiserror::Error;

/// Confirmation returned by a successful capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReceipt {
    /// Reference assigned by the gateway.
    pub reference: String,
}

/// A failed capture attempt. Every variant is retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The gateway refused the charge.
    #[error("Capture declined: {0}")]
    Declined(String),

    /// The gateway could not be reached or did not respond.
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),
}

impl CaptureError {
    /// Returns the error category recorded on dead letters.
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureError::Declined(_) => "CaptureDeclined",
            CaptureError::Unavailable(_) => "GatewayUnavailable",
        }
    }
}

/// Captures the full amount of an order.
#[async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    /// Makes one capture attempt.
    async fn capture(&self, order: &Order) -> Result<CaptureReceipt, CaptureError>;
}

/// Approves every capture.
#[derive(Debug, Clone, Default)]
pub struct ApprovingGateway {
    captures: Arc<AtomicUsize>,
}

impl ApprovingGateway {
    /// Creates a new approving gateway.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentGateway for ApprovingGateway {
    async fn capture(&self, order: &Order) -> Result<CaptureReceipt, CaptureError> {
        let n = self.captures.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CaptureReceipt {
            reference: format!("CAP-{:06}-{}", n, order.id),
        })
    }
}

/// Declines any order whose total exceeds a limit.
#[derive(Debug, Clone)]
pub struct CaptureLimitGateway {
    limit: Amount,
    inner: ApprovingGateway,
}

impl CaptureLimitGateway {
    /// Creates a gateway approving totals up to and including `limit`.
    pub fn new(limit: Amount) -> Self {
        Self {
            limit,
            inner: ApprovingGateway::new(),
        }
    }
}

#[async_trait]
impl PaymentGateway for CaptureLimitGateway {
    async fn capture(&self, order: &Order) -> Result<CaptureReceipt, CaptureError> {
        let within_limit = match (order.total_amount.minor_units(), self.limit.minor_units()) {
            (Some(total), Some(limit)) => total <= limit,
            _ => false,
        };
        if !within_limit {
            return Err(CaptureError::Declined(format!(
                "amount {} exceeds capture limit {}",
                order.total_amount, self.limit
            )));
        }
        self.inner.capture(order).await
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    outcomes: VecDeque<Result<(), CaptureError>>,
    fallback_fail: Option<CaptureError>,
    attempts: usize,
}

/// Gateway driven by a script of outcomes, for tests.
///
/// Each capture pops the next scripted outcome. Once the script runs out,
/// captures succeed unless [`ScriptedGateway::set_fail_on_capture`] is set.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGateway {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedGateway {
    /// Creates a gateway that approves everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a gateway that declines every capture.
    pub fn always_declining() -> Self {
        let gateway = Self::new();
        gateway.set_fail_on_capture(true);
        gateway
    }

    /// Appends `n` declines to the script.
    pub fn decline_times(&self, n: usize) -> &Self {
        let mut state = self.lock();
        for i in 0..n {
            state
                .outcomes
                .push_back(Err(CaptureError::Declined(format!("scripted decline {}", i + 1))));
        }
        self
    }

    /// Appends one approval to the script.
    pub fn approve_once(&self) -> &Self {
        self.lock().outcomes.push_back(Ok(()));
        self
    }

    /// Sets whether captures fail once the script is exhausted.
    pub fn set_fail_on_capture(&self, fail: bool) {
        self.lock().fallback_fail =
            fail.then(|| CaptureError::Declined("Simulated payment failure".to_string()));
    }

    /// Returns the number of capture attempts made so far.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn capture(&self, order: &Order) -> Result<CaptureReceipt, CaptureError> {
        let mut state = self.lock();
        state.attempts += 1;

        let outcome = match state.outcomes.pop_front() {
            Some(outcome) => outcome,
            None => match &state.fallback_fail {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            },
        };

        outcome.map(|()| CaptureReceipt {
            reference: format!("SCRIPT-{}-{}", state.attempts, order.id),
        })
    }
}
