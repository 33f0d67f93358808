use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::{
    UserId,
    error::EventError,
    repositories::AuditRepository,
    session::SessionId,
    storage::AuditEntry,
    sync::SyncMode,
    user::Role,
};

/// Security and synchronization events.
///
/// Events are emitted after the state change they describe has been persisted.
#[derive(Debug, Clone)]
pub enum Event {
    LoginSucceeded {
        user_id: UserId,
        email: String,
        role: Role,
        session_id: SessionId,
        ip_address: Option<String>,
        device: String,
        timestamp: DateTime<Utc>,
    },

    /// Emitted when a login attempt fails on credentials or a second factor.
    LoginFailed {
        email: String,
        /// Number of failed attempts in the current window
        failed_attempts: u32,
        ip_address: Option<String>,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Emitted when an account becomes locked due to too many failed attempts.
    AccountLocked {
        email: String,
        failed_attempts: u32,
        /// Consecutive lockouts, including this one
        lockout_count: u32,
        locked_until: DateTime<Utc>,
        ip_address: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Emitted when an administrator lifts a lockout.
    AccountUnlocked {
        email: String,
        timestamp: DateTime<Utc>,
    },

    /// Credentials were valid and the user must now present a second factor.
    TwoFactorChallenged {
        user_id: UserId,
        email: String,
        ip_address: Option<String>,
        timestamp: DateTime<Utc>,
    },

    RecoveryCodeUsed {
        user_id: UserId,
        email: String,
        ip_address: Option<String>,
        timestamp: DateTime<Utc>,
    },

    SessionLimitReached {
        user_id: UserId,
        email: String,
        current: u32,
        max: u32,
        ip_address: Option<String>,
        timestamp: DateTime<Utc>,
    },

    SessionBlocked {
        user_id: UserId,
        session_id: SessionId,
        timestamp: DateTime<Utc>,
    },

    LoggedOut {
        user_id: UserId,
        session_id: SessionId,
        timestamp: DateTime<Utc>,
    },

    TableSynced {
        table: String,
        mode: SyncMode,
        synced_count: u64,
        errors: usize,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Stable name used as the audit record kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::LoginSucceeded { .. } => "login_succeeded",
            Event::LoginFailed { .. } => "login_failed",
            Event::AccountLocked { .. } => "account_locked",
            Event::AccountUnlocked { .. } => "account_unlocked",
            Event::TwoFactorChallenged { .. } => "two_factor_challenged",
            Event::RecoveryCodeUsed { .. } => "recovery_code_used",
            Event::SessionLimitReached { .. } => "session_limit_reached",
            Event::SessionBlocked { .. } => "session_blocked",
            Event::LoggedOut { .. } => "logged_out",
            Event::TableSynced { .. } => "table_synced",
        }
    }

    pub fn to_audit_entry(&self) -> AuditEntry {
        let entry = AuditEntry::new(self.kind());
        match self {
            Event::LoginSucceeded {
                user_id,
                email,
                role,
                session_id,
                ip_address,
                device,
                ..
            } => entry
                .email(email)
                .user_id(user_id)
                .ip_address(ip_address.as_deref())
                .detail(json!({ "role": role, "session_id": session_id, "device": device })),
            Event::LoginFailed {
                email,
                failed_attempts,
                ip_address,
                reason,
                ..
            } => entry
                .email(email)
                .ip_address(ip_address.as_deref())
                .detail(json!({ "failed_attempts": failed_attempts, "reason": reason })),
            Event::AccountLocked {
                email,
                failed_attempts,
                lockout_count,
                locked_until,
                ip_address,
                ..
            } => entry.email(email).ip_address(ip_address.as_deref()).detail(json!({
                "failed_attempts": failed_attempts,
                "lockout_count": lockout_count,
                "locked_until": locked_until,
            })),
            Event::AccountUnlocked { email, .. } => entry.email(email),
            Event::TwoFactorChallenged {
                user_id,
                email,
                ip_address,
                ..
            }
            | Event::RecoveryCodeUsed {
                user_id,
                email,
                ip_address,
                ..
            } => entry
                .email(email)
                .user_id(user_id)
                .ip_address(ip_address.as_deref()),
            Event::SessionLimitReached {
                user_id,
                email,
                current,
                max,
                ip_address,
                ..
            } => entry
                .email(email)
                .user_id(user_id)
                .ip_address(ip_address.as_deref())
                .detail(json!({ "current": current, "max": max })),
            Event::SessionBlocked {
                user_id,
                session_id,
                ..
            }
            | Event::LoggedOut {
                user_id,
                session_id,
                ..
            } => entry
                .user_id(user_id)
                .detail(json!({ "session_id": session_id })),
            Event::TableSynced {
                table,
                mode,
                synced_count,
                errors,
                ..
            } => entry.detail(json!({
                "table": table,
                "mode": mode,
                "synced_count": synced_count,
                "errors": errors,
            })),
        }
    }
}

/// A trait for handling events emitted by the event bus
///
/// ```rust,ignore
/// struct MyHandler;
///
/// #[async_trait]
/// impl EventHandler for MyHandler {
///     async fn handle_event(&self, event: &Event) -> Result<(), EventError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle_event(&self, event: &Event) -> Result<(), EventError>;
}

/// Event bus that can emit events and register event handlers
///
/// ```rust,ignore
/// let event_bus = EventBus::default();
/// event_bus.register(Arc::new(AuditEventHandler::new(audit_repository))).await;
/// event_bus.emit(&event).await?;
/// ```
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<tokio::sync::RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(tokio::sync::RwLock::new(Vec::new())),
        }
    }

    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// Emit an event to all registered handlers, stopping at the first error
    pub async fn emit(&self, event: &Event) -> Result<(), EventError> {
        for handler in self.handlers.read().await.iter() {
            handler.handle_event(event).await?;
        }

        Ok(())
    }
}

/// Persists every event to the audit trail.
pub struct AuditEventHandler<A: AuditRepository> {
    repository: Arc<A>,
}

impl<A: AuditRepository> AuditEventHandler<A> {
    pub fn new(repository: Arc<A>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl<A: AuditRepository> EventHandler for AuditEventHandler<A> {
    async fn handle_event(&self, event: &Event) -> Result<(), EventError> {
        self.repository
            .append(event.to_audit_entry())
            .await
            .map_err(|e| EventError::HandlerError(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock::MockStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        call_count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle_event(&self, _event: &Event) -> Result<(), EventError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ErroringEventHandler;

    #[async_trait]
    impl EventHandler for ErroringEventHandler {
        async fn handle_event(&self, _event: &Event) -> Result<(), EventError> {
            Err(EventError::BusError("Test error".into()))
        }
    }

    fn unlocked() -> Event {
        Event::AccountUnlocked {
            email: "a@example.com".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_empty() {
        EventBus::default()
            .emit(&unlocked())
            .await
            .expect("Failed to emit event");
    }

    #[tokio::test]
    async fn test_event_bus_multiple_handlers() {
        let event_bus = EventBus::default();
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        event_bus
            .register(Arc::new(CountingHandler {
                call_count: count1.clone(),
            }))
            .await;
        event_bus
            .register(Arc::new(CountingHandler {
                call_count: count2.clone(),
            }))
            .await;

        event_bus.emit(&unlocked()).await.unwrap();

        assert_eq!(count1.load(Ordering::SeqCst), 1);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_event_bus_error_propagation() {
        let event_bus = EventBus::default();
        event_bus.register(Arc::new(ErroringEventHandler)).await;

        let result = event_bus.emit(&unlocked()).await;
        assert!(matches!(result.unwrap_err(), EventError::BusError(_)));
    }

    #[tokio::test]
    async fn test_audit_handler_persists_events() {
        let store = Arc::new(MockStore::new());
        let event_bus = EventBus::default();
        event_bus
            .register(Arc::new(AuditEventHandler::new(store.clone())))
            .await;

        event_bus
            .emit(&Event::AccountLocked {
                email: "a@example.com".to_string(),
                failed_attempts: 5,
                lockout_count: 2,
                locked_until: Utc::now(),
                ip_address: Some("10.0.0.1".to_string()),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        event_bus
            .emit(&Event::TableSynced {
                table: "courses".to_string(),
                mode: SyncMode::Incremental,
                synced_count: 12,
                errors: 0,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        let records = store.list_recent(10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, "table_synced");
        assert_eq!(records[0].detail["mode"], "incremental");
        assert_eq!(records[1].kind, "account_locked");
        assert_eq!(records[1].email.as_deref(), Some("a@example.com"));
        assert_eq!(records[1].detail["lockout_count"], 2);
    }
}
