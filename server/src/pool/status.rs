//! What each worker is doing right now

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Worker name to activity, shared by every pool of the process.
///
/// Each worker owns exactly one [`StatusSlot`] and is the only writer of
/// its entry; readers take a [`StatusBoard::snapshot`].
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    slots: Arc<RwLock<BTreeMap<String, Arc<Mutex<String>>>>>,
}

impl StatusBoard {
    /// An empty board
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry for `name`, replacing an older one of the same name
    #[must_use]
    pub fn register(&self, name: &str) -> StatusSlot {
        let activity = Arc::new(Mutex::new("starting".to_string()));
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), activity.clone());
        StatusSlot {
            name: name.to_string(),
            activity,
        }
    }

    /// Remove the entry for `name`
    pub fn unregister(&self, name: &str) {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// A copy of every entry
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, activity)| {
                let activity = activity.lock().unwrap_or_else(PoisonError::into_inner);
                (name.clone(), activity.clone())
            })
            .collect()
    }
}

/// The entry of a single worker
#[derive(Debug)]
pub struct StatusSlot {
    name: String,
    activity: Arc<Mutex<String>>,
}

impl StatusSlot {
    /// The worker this slot belongs to
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish a new activity
    pub fn set(&self, activity: &str) {
        let mut current = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
        current.clear();
        current.push_str(activity);
    }
}
