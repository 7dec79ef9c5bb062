// src/mailer.rs

//! Outbound email guarded by a circuit breaker.
//!
//! Requests are validated before the breaker sees them, so a malformed
//! message never counts against the transport. A message that cannot be
//! delivered right now, because the breaker rejected it or the transport
//! failed, is parked in a bounded outbox and reported as
//! [`SendOutcome::Queued`]. [`Mailer::flush_outbox`] retries the parked
//! messages later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::breaker::Breaker;
use crate::error::{CallFailure, GuardError};
use crate::simulation::{Backend, BackendError};

/// Longest accepted subject, in characters
pub const MAX_SUBJECT_CHARS: usize = 200;

/// Longest accepted body, in characters
pub const MAX_BODY_CHARS: usize = 5000;

/// Outbox size used by [`Mailer::new`]
pub const DEFAULT_OUTBOX_CAPACITY: usize = 1000;

const ADMIN_ADDRESS: &str = "admin@example.com";
const SYSTEM_ADDRESS: &str = "system@example.com";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// A message to send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRequest {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub priority: Priority,
}

impl EmailRequest {
    pub fn new(
        to: impl Into<String>,
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            from: from.into(),
            subject: subject.into(),
            body: body.into(),
            priority: Priority::Normal,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Check the request without contacting anything
    pub fn validate(&self) -> Result<(), SendError> {
        check_address("recipient", &self.to)?;
        check_address("sender", &self.from)?;
        check_text("subject", &self.subject, MAX_SUBJECT_CHARS)?;
        check_text("body", &self.body, MAX_BODY_CHARS)?;
        Ok(())
    }
}

fn check_address(field: &str, address: &str) -> Result<(), SendError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(SendError::Invalid(format!("{} is required", field)));
    }
    match address.split_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !address.contains(char::is_whitespace) =>
        {
            Ok(())
        }
        _ => Err(SendError::Invalid(format!(
            "{} address {:?} is malformed",
            field, address
        ))),
    }
}

fn check_text(field: &str, text: &str, max_chars: usize) -> Result<(), SendError> {
    if text.trim().is_empty() {
        return Err(SendError::Invalid(format!("{} is required", field)));
    }
    if text.chars().count() > max_chars {
        return Err(SendError::Invalid(format!(
            "{} exceeds {} characters",
            field, max_chars
        )));
    }
    Ok(())
}

/// Errors inside the guarded send path
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailerError {
    #[error("Mail transport error: {0}")]
    Transport(#[from] BackendError),

    #[error("Outbox full ({capacity} messages waiting)")]
    OutboxFull { capacity: usize },
}

/// Why `send` could not accept a message
#[derive(Error, Debug)]
pub enum SendError {
    /// Rejected before reaching the breaker
    #[error("Invalid email request: {0}")]
    Invalid(String),

    /// Neither delivered nor queued
    #[error(transparent)]
    Undeliverable(#[from] GuardError<MailerError>),
}

/// What happened to an accepted message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SendOutcome {
    /// Handed to the transport
    Sent,
    /// Parked in the outbox for later delivery
    Queued,
}

/// A parked message and why it was parked
#[derive(Debug, Clone, Serialize)]
pub struct QueuedEmail {
    pub request: EmailRequest,
    pub reason: String,
    pub queued_at: DateTime<Utc>,
}

/// Per-message results of a bulk send
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub sent: usize,
    pub queued: usize,
    pub invalid: usize,
    pub failed: usize,
}

impl BulkReport {
    /// Messages that were either sent or queued
    pub fn accepted(&self) -> usize {
        self.sent + self.queued
    }

    pub fn total(&self) -> usize {
        self.accepted() + self.invalid + self.failed
    }
}

/// Email sender behind a breaker-guarded transport
#[derive(Debug)]
pub struct Mailer {
    breaker: Arc<Breaker>,
    transport: Arc<dyn Backend>,
    outbox: Mutex<VecDeque<QueuedEmail>>,
    outbox_capacity: usize,
}

impl Mailer {
    pub fn new(breaker: Arc<Breaker>, transport: Arc<dyn Backend>) -> Self {
        Self {
            breaker,
            transport,
            outbox: Mutex::new(VecDeque::new()),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }

    /// Limit how many messages may wait in the outbox
    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity;
        self
    }

    pub fn breaker(&self) -> &Arc<Breaker> {
        &self.breaker
    }

    /// Send a message, queueing it when the transport is unavailable.
    ///
    /// Invalid requests fail without touching the breaker. A send that is
    /// rejected or fails is queued and reported as [`SendOutcome::Queued`];
    /// only a full outbox makes it an error.
    pub async fn send(&self, request: EmailRequest) -> Result<SendOutcome, SendError> {
        debug!(from = %request.from, to = %request.to, "Sending email");
        if let Err(err) = request.validate() {
            warn!(to = %request.to, error = %err, "Rejecting invalid email request");
            return Err(err);
        }

        let outcome = self
            .breaker
            .guard_with_fallback(
                || self.deliver(&request),
                |reason: &CallFailure<MailerError>| {
                    warn!(to = %request.to, %reason, "Email not delivered, queueing");
                    let queued = self.enqueue(&request, reason);
                    async move { queued.map(|()| SendOutcome::Queued) }
                },
            )
            .await;
        if let Err(err) = &outcome {
            error!(to = %request.to, error = %err, "Email dropped");
        }
        Ok(outcome?)
    }

    /// Notify the administrator with a high-priority message
    pub async fn send_admin_notification(&self, message: &str) -> Result<SendOutcome, SendError> {
        let subject = format!("System notification - {}", Utc::now().format("%H:%M:%S"));
        let request = EmailRequest::new(ADMIN_ADDRESS, SYSTEM_ADDRESS, subject, message)
            .with_priority(Priority::High);
        self.send(request).await
    }

    /// Send every message in turn; one bad message never stops the rest
    pub async fn send_bulk(&self, requests: impl IntoIterator<Item = EmailRequest>) -> BulkReport {
        let mut report = BulkReport::default();
        for request in requests {
            match self.send(request).await {
                Ok(SendOutcome::Sent) => report.sent += 1,
                Ok(SendOutcome::Queued) => report.queued += 1,
                Err(SendError::Invalid(_)) => report.invalid += 1,
                Err(SendError::Undeliverable(_)) => report.failed += 1,
            }
        }
        info!(
            sent = report.sent,
            queued = report.queued,
            invalid = report.invalid,
            failed = report.failed,
            "Bulk send finished: {}/{} accepted",
            report.accepted(),
            report.total()
        );
        report
    }

    /// Retry parked messages in order.
    ///
    /// Stops at the first message that cannot be delivered and leaves it,
    /// and everything behind it, in the outbox. Returns how many were sent.
    pub async fn flush_outbox(&self) -> usize {
        let mut delivered = 0;
        loop {
            let Some(parked) = self.lock_outbox().pop_front() else {
                break;
            };

            match self.breaker.guard(|| self.deliver(&parked.request)).await {
                Ok(_) => delivered += 1,
                Err(err) => {
                    debug!(to = %parked.request.to, error = %err, "Outbox flush stopped");
                    self.lock_outbox().push_front(parked);
                    break;
                }
            }
        }
        if delivered > 0 {
            info!(delivered, remaining = self.queued(), "Outbox flushed");
        }
        delivered
    }

    /// Number of messages waiting in the outbox
    pub fn queued(&self) -> usize {
        self.lock_outbox().len()
    }

    /// Snapshot of the outbox, oldest first
    pub fn outbox(&self) -> Vec<QueuedEmail> {
        self.lock_outbox().iter().cloned().collect()
    }

    /// Whether the transport answers through the breaker
    pub async fn is_healthy(&self) -> bool {
        match self.breaker.guard(|| self.ping()).await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "Mail transport health check failed");
                false
            }
        }
    }

    async fn deliver(&self, request: &EmailRequest) -> Result<SendOutcome, MailerError> {
        self.transport.invoke("send_email").await?;
        info!(
            from = %request.from,
            to = %request.to,
            subject = %request.subject,
            priority = ?request.priority,
            "Email sent"
        );
        Ok(SendOutcome::Sent)
    }

    async fn ping(&self) -> Result<(), MailerError> {
        self.transport.invoke("mail_health_check").await?;
        Ok(())
    }

    fn enqueue(
        &self,
        request: &EmailRequest,
        reason: &CallFailure<MailerError>,
    ) -> Result<(), MailerError> {
        let mut outbox = self.lock_outbox();
        if outbox.len() >= self.outbox_capacity {
            return Err(MailerError::OutboxFull {
                capacity: self.outbox_capacity,
            });
        }
        outbox.push_back(QueuedEmail {
            request: request.clone(),
            reason: reason.to_string(),
            queued_at: Utc::now(),
        });
        info!(to = %request.to, waiting = outbox.len(), "Email queued for later delivery");
        Ok(())
    }

    fn lock_outbox(&self) -> MutexGuard<'_, VecDeque<QueuedEmail>> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
