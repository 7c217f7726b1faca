//! Per-user balance locks
//!
//! Every read-modify-write of a balance happens while the owner's lock is
//! held. Operations touching several users acquire the locks in ascending
//! user-id order, so two tips crossing between the same pair of accounts in
//! opposite directions cannot deadlock.

use crate::types::UserId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Lock table keyed by user
///
/// Entries exist only while some caller holds or waits on them.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl LockManager {
    /// Create empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, user_id: UserId) -> Arc<Mutex<()>> {
        self.locks.entry(user_id).or_default().clone()
    }

    /// Run `f` while holding the locks of every user in `users`
    ///
    /// Duplicates are ignored. `f` receives the locked set in acquisition order.
    pub fn with_locked<R>(&self, users: &[UserId], f: impl FnOnce(&[UserId]) -> R) -> R {
        let mut ordered = users.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let handles: Vec<_> = ordered.iter().map(|user| self.handle(*user)).collect();
        let result = {
            let _guards: Vec<_> = handles.iter().map(|lock| lock.lock()).collect();
            f(&ordered)
        };
        drop(handles);

        // The map's own reference is the last one: nobody holds or awaits it
        for user in &ordered {
            self.locks.remove_if(user, |_, lock| Arc::strong_count(lock) == 1);
        }

        result
    }

    /// Number of users with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// No lock entries yet
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
