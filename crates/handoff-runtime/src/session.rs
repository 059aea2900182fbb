//! Per-thread sessions with idle expiry and a soft capacity cap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use handoff_core::persistence::ThreadId;
use handoff_core::state::ConversationState;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::graph::CompiledGraph;

/// What a thread keeps between turns.
#[derive(Debug)]
pub struct Session {
    pub graph: Arc<CompiledGraph>,
    pub state: ConversationState,
    pub last_activity: DateTime<Utc>,
}

/// Exclusive access to one thread's session for the length of a turn.
pub type SessionGuard = OwnedMutexGuard<Option<Session>>;

type SessionCell = Arc<Mutex<Option<Session>>>;

struct Slot {
    cell: SessionCell,
    touched: DateTime<Utc>,
}

impl Slot {
    /// Nobody outside the registry holds or waits on the cell.
    fn is_idle(&self) -> bool {
        Arc::strong_count(&self.cell) == 1
    }
}

pub struct Acquired {
    pub guard: SessionGuard,
    /// Threads dropped to make room or because they expired.
    pub evicted: Vec<ThreadId>,
}

pub struct SessionRegistry {
    slots: Mutex<HashMap<ThreadId, Slot>>,
    ttl: Duration,
    capacity: usize,
}

impl SessionRegistry {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Locks the thread's session, creating an empty one if needed. Waits
    /// while another turn of the same thread holds it.
    pub async fn acquire(&self, thread_id: &ThreadId) -> Acquired {
        let now = Utc::now();
        let (cell, evicted) = {
            let mut slots = self.slots.lock().await;
            let mut evicted = self.evict_expired(&mut slots, now, Some(thread_id));

            if !slots.contains_key(thread_id) && slots.len() >= self.capacity {
                let oldest = slots
                    .iter()
                    .filter(|(_, slot)| slot.is_idle())
                    .min_by_key(|(_, slot)| slot.touched)
                    .map(|(id, _)| id.clone());
                match oldest {
                    Some(id) => {
                        slots.remove(&id);
                        debug!(thread_id = %id, "Evicted least recently used session");
                        evicted.push(id);
                    }
                    None => warn!(
                        capacity = self.capacity,
                        "Every session is busy; exceeding the session cap"
                    ),
                }
            }

            let slot = slots.entry(thread_id.clone()).or_insert_with(|| Slot {
                cell: Arc::new(Mutex::new(None)),
                touched: now,
            });
            slot.touched = now;
            (slot.cell.clone(), evicted)
        };

        Acquired {
            guard: cell.lock_owned().await,
            evicted,
        }
    }

    /// Whether the thread has a stored session or a turn holding its cell.
    pub async fn is_live(&self, thread_id: &ThreadId) -> bool {
        match self.peek(thread_id).await {
            Some(cell) => cell.try_lock().map_or(true, |session| session.is_some()),
            None => false,
        }
    }

    /// Gives back a guard from a turn that never started. A cell left empty
    /// is removed so it does not count toward the capacity.
    pub async fn release(&self, thread_id: &ThreadId, guard: SessionGuard) {
        if guard.is_some() {
            return;
        }
        drop(guard);
        let mut slots = self.slots.lock().await;
        let vacant = slots.get(thread_id).is_some_and(|slot| {
            slot.is_idle() && slot.cell.try_lock().is_ok_and(|session| session.is_none())
        });
        if vacant {
            slots.remove(thread_id);
            debug!(%thread_id, "Released unused session slot");
        }
    }

    /// Refreshes the thread's idle clock.
    pub async fn touch(&self, thread_id: &ThreadId) {
        if let Some(slot) = self.slots.lock().await.get_mut(thread_id) {
            slot.touched = Utc::now();
        }
    }

    /// Drops every idle session whose last activity is at least the TTL
    /// before `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<ThreadId> {
        let mut slots = self.slots.lock().await;
        self.evict_expired(&mut slots, now, None)
    }

    /// The thread's session cell without creating one.
    pub async fn peek(&self, thread_id: &ThreadId) -> Option<Arc<Mutex<Option<Session>>>> {
        self.slots
            .lock()
            .await
            .get(thread_id)
            .map(|slot| slot.cell.clone())
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }

    fn evict_expired(
        &self,
        slots: &mut HashMap<ThreadId, Slot>,
        now: DateTime<Utc>,
        keep: Option<&ThreadId>,
    ) -> Vec<ThreadId> {
        let expired: Vec<ThreadId> = slots
            .iter()
            .filter(|(id, _)| Some(*id) != keep)
            .filter(|(_, slot)| {
                slot.is_idle() && (now - slot.touched).to_std().unwrap_or_default() >= self.ttl
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            slots.remove(id);
            debug!(thread_id = %id, "Evicted expired session");
        }
        expired
    }
}
