use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

/// Something in this user's meal list changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MealChange {
    pub user_id: Uuid,
}

/// Process-wide fan-out of meal changes to live subscribers.
#[derive(Clone)]
pub struct MealEvents {
    tx: broadcast::Sender<MealChange>,
}

impl MealEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, user_id: Uuid) {
        // Err only means nobody is listening right now.
        let receivers = self.tx.send(MealChange { user_id }).unwrap_or(0);
        trace!(%user_id, receivers, "meal change published");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MealChange> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for MealEvents {
    fn default() -> Self {
        Self::new()
    }
}
