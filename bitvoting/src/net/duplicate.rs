use parking_lot::Mutex;
use uuid::Uuid;

use crate::unix_time_ms;

/// Remembers recently seen message ids so re-flooded messages are delivered
/// at most once. Entries older than the validity window are pruned on every
/// check, which keeps the list bounded.
pub struct DuplicateList {
    validity_ms: i64,
    seen: Mutex<Vec<(Uuid, i64)>>,
}

impl DuplicateList {
    pub fn new(validity_ms: i64) -> DuplicateList {
        DuplicateList {
            validity_ms,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Register a message this node originated, so its own flood does not
    /// come back around.
    pub fn register(&self, id: Uuid) {
        self.seen.lock().push((id, unix_time_ms()));
    }

    /// Returns true when the id was seen within the validity window;
    /// otherwise registers it and returns false.
    pub fn check_duplicate(&self, id: Uuid) -> bool {
        let now = unix_time_ms();
        let mut seen = self.seen.lock();
        seen.retain(|(_, at)| now - at < self.validity_ms);
        if seen.iter().any(|(known, _)| *known == id) {
            return true;
        }
        seen.push((id, now));
        false
    }
}
