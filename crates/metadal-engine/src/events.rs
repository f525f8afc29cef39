// SPDX-FileCopyrightText: 2025-2026 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Domain events emitted after committed writes.
//!
//! Subjects follow `{service}.{tenant}.{table}.{created|updated|deleted|restored}`.
//! Publication is best effort: the engine logs a failed publish and still
//! reports the write as successful.
//!
//! | Publisher | Feature | Delivers to |
//! |-----------|---------|-------------|
//! | [`NoopPublisher`] | always | nowhere |
//! | [`BroadcastPublisher`] | always | in-process `tokio::sync::broadcast` subscribers |
//! | `PgNotifyPublisher` | `postgres` | `pg_notify` on a channel |

use async_trait::async_trait;
use metadal_core::{EventKind, Record, TenantId};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

pub use crate::error::PublishError;

/// One lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainEvent {
    /// Routing subject.
    pub subject: String,
    /// What happened.
    pub kind:    EventKind,
    /// Row snapshot after the write (before it, for hard deletes).
    pub payload: Record
}

impl DomainEvent {
    /// Event for `table` in `tenant` of `service`.
    #[must_use]
    pub fn new(
        service: &str,
        tenant: &TenantId,
        table: &str,
        kind: EventKind,
        payload: Record
    ) -> Self {
        Self {
            subject: subject(service, tenant, table, kind),
            kind,
            payload
        }
    }
}

/// `{service}.{tenant}.{table}.{suffix}`.
#[must_use]
pub fn subject(service: &str, tenant: &TenantId, table: &str, kind: EventKind) -> String {
    format!("{service}.{tenant}.{table}.{}", kind.subject_suffix())
}

/// Event sink.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Deliver one event.
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError>;
}

/// Publisher that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, _event: &DomainEvent) -> Result<(), PublishError> {
        Ok(())
    }
}

/// In-process fan-out.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<DomainEvent>
}

impl BroadcastPublisher {
    /// Channel retaining at most `capacity` undelivered events per
    /// subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender
        }
    }

    /// New subscriber receiving events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        if self.sender.send(event.clone()).is_err() {
            debug!(subject = %event.subject, "no subscribers, event dropped");
        }
        Ok(())
    }
}

#[cfg(feature = "postgres")]
pub use pg_notify::PgNotifyPublisher;

#[cfg(feature = "postgres")]
mod pg_notify {
    use async_trait::async_trait;
    use sqlx::PgPool;

    use super::{DomainEvent, EventPublisher, PublishError};

    /// Publisher sending each event as a JSON envelope through `pg_notify`.
    #[derive(Debug, Clone)]
    pub struct PgNotifyPublisher {
        pool:    PgPool,
        channel: String
    }

    impl PgNotifyPublisher {
        /// Notify on `channel`.
        #[must_use]
        pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
            Self {
                pool,
                channel: channel.into()
            }
        }
    }

    #[async_trait]
    impl EventPublisher for PgNotifyPublisher {
        async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
            let envelope =
                serde_json::to_string(event).map_err(|e| PublishError::Encode(e.to_string()))?;
            sqlx::query("SELECT pg_notify($1, $2)")
                .bind(&self.channel)
                .bind(envelope)
                .execute(&self.pool)
                .await
                .map_err(|e| PublishError::Unavailable(e.to_string()))?;
            Ok(())
        }
    }
}
