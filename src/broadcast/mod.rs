//! Fan-out of gateway events to real-time subscribers, plus the pull-style
//! status/QR queries late joiners use to catch up.

use crate::events::GatewayEvent;
use crate::pairing::QrChallenge;
use crate::session::{SessionState, StatusSnapshot};
use crate::types::AccountId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique subscriber identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0.simple())
    }
}

struct Subscriber {
    tx: mpsc::Sender<Arc<GatewayEvent>>,
    account: Option<AccountId>,
}

impl Subscriber {
    fn wants(&self, account: &AccountId) -> bool {
        self.account.as_ref().is_none_or(|a| a == account)
    }
}

type Registry = DashMap<SubscriberId, Subscriber>;

/// Single fan-out point from sessions to subscribers.
///
/// Publishing never waits on a subscriber: each one has a bounded queue and
/// an event that does not fit is dropped for that subscriber only.
pub struct EventBroadcaster {
    subscribers: Arc<Registry>,
    status: DashMap<AccountId, StatusSnapshot>,
    qr: DashMap<AccountId, QrChallenge>,
    queue_capacity: usize,
}

impl EventBroadcaster {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            status: DashMap::new(),
            qr: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Attach a subscriber; `account` limits delivery to one account.
    pub fn subscribe(&self, account: Option<AccountId>) -> Subscription {
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.subscribers.insert(id, Subscriber { tx, account });
        tracing::debug!(subscriber = %id, "subscriber attached");
        Subscription {
            id,
            since: Utc::now(),
            rx,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver `event` to every interested subscriber.
    pub fn publish(&self, event: GatewayEvent) {
        self.remember(&event);

        let event = Arc::new(event);
        let account = event.account_id();
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            if !subscriber.wants(account) {
                continue;
            }
            match subscriber.tx.try_send(Arc::clone(&event)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        subscriber = %entry.key(),
                        account = %account,
                        event = event.name(),
                        "subscriber queue full, dropping event"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }
        for id in closed {
            self.subscribers.remove(&id);
            tracing::debug!(subscriber = %id, "removed closed subscriber");
        }
    }

    /// Latest status of `account`; `disconnected` if nothing was published yet.
    pub fn current_status(&self, account: &AccountId) -> StatusSnapshot {
        self.status
            .get(account)
            .map(|s| s.value().clone())
            .unwrap_or_else(|| StatusSnapshot::disconnected(account.clone()))
    }

    /// Current QR challenge, only while the account is pairing and the
    /// challenge has not expired.
    pub fn current_qr(&self, account: &AccountId) -> Option<QrChallenge> {
        let pending = self
            .status
            .get(account)
            .is_some_and(|s| s.state == SessionState::QrPending);
        if !pending {
            return None;
        }
        self.qr
            .get(account)
            .map(|qr| qr.value().clone())
            .filter(|qr| !qr.is_expired())
    }

    /// Accounts that have published at least one status.
    pub fn accounts(&self) -> Vec<AccountId> {
        let mut accounts: Vec<_> = self.status.iter().map(|e| e.key().clone()).collect();
        accounts.sort();
        accounts
    }

    fn remember(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::ConnectionStatus(status) => {
                if status.state != SessionState::QrPending {
                    self.qr.remove(&status.account_id);
                }
                self.status.insert(status.account_id.clone(), status.clone());
            }
            GatewayEvent::QrGenerated {
                account_id,
                payload,
                timestamp,
                expires_at,
            } => {
                self.qr.insert(
                    account_id.clone(),
                    QrChallenge {
                        payload: payload.clone(),
                        issued_at: *timestamp,
                        expires_at: *expires_at,
                    },
                );
            }
            _ => {}
        }
    }
}

/// Receiving end of a subscription. Dropping it detaches the subscriber.
pub struct Subscription {
    id: SubscriberId,
    since: DateTime<Utc>,
    rx: mpsc::Receiver<Arc<GatewayEvent>>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn since(&self) -> DateTime<Utc> {
        self.since
    }

    pub async fn recv(&mut self) -> Option<Arc<GatewayEvent>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<GatewayEvent>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.id);
        }
    }
}
