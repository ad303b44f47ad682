//! Outbound side effects of committed bookings.
//!
//! Two channels leave the engine after a commit:
//! - [`Outbox`]: client-facing notices, drained by [`run_dispatcher`], which
//!   resolves the recipient and retries delivery with exponential backoff.
//! - [`NotifyHub`]: a per-tenant broadcast of every committed
//!   [`ScheduleEvent`] for in-process subscribers.
//!
//! Neither can fail a booking. A full queue drops the notice with a warning.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::config::NotifyConfig;
use crate::directory::ClientDirectory;
use crate::model::{Client, ScheduleEvent, Span};

/// Domain events addressed to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    SessionBooked {
        tenant_id: Ulid,
        session_id: Ulid,
        client_id: Ulid,
        /// Parent first, then generated occurrences.
        occurrences: Vec<Span>,
    },
    SessionCancelled {
        tenant_id: Ulid,
        session_id: Ulid,
        client_id: Ulid,
        start: DateTime<Utc>,
    },
}

impl Notice {
    pub fn tenant_id(&self) -> Ulid {
        match self {
            Notice::SessionBooked { tenant_id, .. }
            | Notice::SessionCancelled { tenant_id, .. } => *tenant_id,
        }
    }

    pub fn client_id(&self) -> Ulid {
        match self {
            Notice::SessionBooked { client_id, .. }
            | Notice::SessionCancelled { client_id, .. } => *client_id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Notice::SessionBooked { .. } => "session_booked",
            Notice::SessionCancelled { .. } => "session_cancelled",
        }
    }

    pub fn render(&self, client: &Client, offset: FixedOffset) -> Mail {
        let fmt = |at: DateTime<Utc>| {
            at.with_timezone(&offset)
                .format("%A %d %B %Y, %H:%M")
                .to_string()
        };
        match self {
            Notice::SessionBooked { occurrences, .. } => {
                let lines: Vec<String> = occurrences.iter().map(|s| fmt(s.start)).collect();
                let subject = if lines.len() > 1 {
                    format!("{} sessions booked", lines.len())
                } else {
                    "Your session is booked".to_string()
                };
                let text = format!(
                    "Hi {},\n\nyou are booked for:\n{}\n",
                    client.first_name,
                    lines.iter().map(|l| format!("- {l}")).collect::<Vec<_>>().join("\n")
                );
                let html = format!(
                    "<p>Hi {},</p><p>you are booked for:</p><ul>{}</ul>",
                    client.first_name,
                    lines.iter().map(|l| format!("<li>{l}</li>")).collect::<String>()
                );
                Mail { subject, text, html }
            }
            Notice::SessionCancelled { start, .. } => {
                let when = fmt(*start);
                Mail {
                    subject: "Your session was cancelled".to_string(),
                    text: format!(
                        "Hi {},\n\nyour session on {when} was cancelled.\n",
                        client.first_name
                    ),
                    html: format!(
                        "<p>Hi {},</p><p>your session on {when} was cancelled.</p>",
                        client.first_name
                    ),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_mail(
        &self,
        to: &str,
        subject: &str,
        text: &str,
        html: &str,
    ) -> Result<(), MailError>;
}

/// Mailer that only logs. Used when no delivery backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_mail(
        &self,
        to: &str,
        subject: &str,
        _text: &str,
        _html: &str,
    ) -> Result<(), MailError> {
        info!(%to, %subject, "mail delivered to log");
        Ok(())
    }
}

// ── Outbox ───────────────────────────────────────────────

#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Notice>,
}

impl Outbox {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notice>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting. Never fails the caller.
    pub fn publish(&self, notice: Notice) {
        if let Err(e) = self.tx.try_send(notice) {
            let notice = match e {
                mpsc::error::TrySendError::Full(n) | mpsc::error::TrySendError::Closed(n) => n,
            };
            warn!(
                tenant = %notice.tenant_id(),
                client = %notice.client_id(),
                kind = notice.kind(),
                "notification dropped: outbox unavailable"
            );
            metrics::counter!(crate::observability::NOTIFICATIONS_DROPPED_TOTAL).increment(1);
        }
    }
}

/// Drain the outbox until every [`Outbox`] handle is dropped.
pub async fn run_dispatcher(
    mut rx: mpsc::Receiver<Notice>,
    clients: Arc<dyn ClientDirectory>,
    mailer: Arc<dyn Mailer>,
    config: NotifyConfig,
    offset: FixedOffset,
) {
    while let Some(notice) = rx.recv().await {
        dispatch(&notice, clients.as_ref(), mailer.as_ref(), &config, offset).await;
    }
    debug!("outbox closed, dispatcher exiting");
}

/// Deliver one notice. Returns whether the mail went out.
pub async fn dispatch(
    notice: &Notice,
    clients: &dyn ClientDirectory,
    mailer: &dyn Mailer,
    config: &NotifyConfig,
    offset: FixedOffset,
) -> bool {
    let client = match clients.find_client(notice.tenant_id(), notice.client_id()).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            warn!(client = %notice.client_id(), "notification skipped: client not found");
            metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL).increment(1);
            return false;
        }
        Err(e) => {
            warn!(client = %notice.client_id(), "notification skipped: {e}");
            metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL).increment(1);
            return false;
        }
    };
    let mail = notice.render(&client, offset);

    let mut backoff = config.initial_backoff;
    for attempt in 1..=config.max_attempts {
        match mailer
            .send_mail(&client.email, &mail.subject, &mail.text, &mail.html)
            .await
        {
            Ok(()) => {
                metrics::counter!(crate::observability::NOTIFICATIONS_SENT_TOTAL).increment(1);
                return true;
            }
            Err(e) if attempt < config.max_attempts => {
                debug!(attempt, "mail to {} failed, retrying in {backoff:?}: {e}", client.email);
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(e) => {
                error!(
                    kind = notice.kind(),
                    "giving up on mail to {} after {attempt} attempts: {e}",
                    client.email
                );
            }
        }
    }
    metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL).increment(1);
    false
}

// ── Change feed ──────────────────────────────────────────

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub of committed events, one channel per tenant.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<ScheduleEvent>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a tenant's events. Creates the channel if needed.
    pub fn subscribe(&self, tenant_id: Ulid) -> broadcast::Receiver<ScheduleEvent> {
        self.channels
            .entry(tenant_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, event: &ScheduleEvent) {
        if let Some(sender) = self.channels.get(&event.tenant_id()) {
            let _ = sender.send(event.clone());
        }
    }
}
