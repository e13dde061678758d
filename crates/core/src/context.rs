//! Request-scoped context threaded through every port call, plus the clock abstraction.

use crate::error::{AssistantError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Correlation data, deadline and cancellation signal for one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub user_id: Option<i64>,
    pub ip: String,
    pub user_agent: String,
    deadline: Option<Instant>,
    cancel: watch::Receiver<bool>,
}

/// Triggers cancellation of every context cloned from the one it was created with.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl RequestContext {
    pub fn new(request_id: Option<String>) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            request_id: request_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            user_id: None,
            ip: String::new(),
            user_agent: String::new(),
            deadline: None,
            cancel: rx,
        };
        (ctx, CancelHandle { tx: Arc::new(tx) })
    }

    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::new(None).0
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_client(mut self, ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.ip = ip.into();
        self.user_agent = user_agent.into();
        self
    }

    /// Tightens the deadline; an earlier existing deadline is kept.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn ensure_active(&self) -> Result<()> {
        if *self.cancel.borrow() {
            return Err(AssistantError::Cancelled("request cancelled"));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(AssistantError::Cancelled("deadline exceeded"));
        }
        Ok(())
    }

    /// Resolves once the cancel handle fires. Never resolves if the handle is gone.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Races `fut` against cancellation and the deadline.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.ensure_active()?;
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            res = fut => res,
            _ = self.cancelled() => Err(AssistantError::Cancelled("request cancelled")),
            _ = deadline => Err(AssistantError::Cancelled("deadline exceeded")),
        }
    }
}

pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
