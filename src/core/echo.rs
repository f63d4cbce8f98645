use dashmap::DashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Maximum age, in seconds, an entry is allowed to live before a sweep
/// reclaims it. Bounds the map's size under sustained publish traffic
/// without requiring every publisher to explicitly remove its own entry.
const MAX_AGE_SECS: u64 = 300;

fn now_epoch_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// In-process `message_id -> first_seen_epoch_seconds` map used to
/// recognize a publish this process made locally when it comes back
/// around through the shared pub/sub bus (spec §5, "local echo").
///
/// Receipt-side lookup is "observe, don't consume": one message fanned
/// out to several channels is observed once per channel by the pub/sub
/// receiver, and removing the entry on first observation would let later
/// channels treat the same message as foreign. Bounded lifetime, not
/// removal-on-read, is what keeps the map's size in check.
#[derive(Debug, Default)]
pub struct LocalEchoSet {
    seen: DashMap<String, i64>,
}

impl LocalEchoSet {
    #[must_use]
    pub fn new() -> Self {
        Self { seen: DashMap::new() }
    }

    /// Records that `message_id` originated from this process, timestamped
    /// now.
    pub fn record(&self, message_id: &str) {
        self.seen.insert(message_id.to_string(), now_epoch_secs());
    }

    /// True iff `message_id` was locally published and hasn't aged out.
    /// Does not remove the entry.
    #[must_use]
    pub fn is_local_echo(&self, message_id: &str) -> bool {
        self.seen.get(message_id).is_some()
    }

    /// Removes every entry older than [`MAX_AGE_SECS`], returning the
    /// count removed.
    pub fn sweep(&self) -> u64 {
        let cutoff = now_epoch_secs() - Duration::from_secs(MAX_AGE_SECS).as_secs() as i64;
        let stale: Vec<String> =
            self.seen.iter().filter(|entry| *entry.value() < cutoff).map(|entry| entry.key().clone()).collect();
        for id in &stale {
            self.seen.remove(id);
        }
        stale.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_observes_without_consuming() {
        let echoes = LocalEchoSet::new();
        echoes.record("m1");
        assert!(echoes.is_local_echo("m1"));
        assert!(echoes.is_local_echo("m1"), "second observation must still see it");
        assert!(!echoes.is_local_echo("unknown"));
    }

    #[test]
    fn sweep_evicts_entries_older_than_cutoff() {
        let echoes = LocalEchoSet::new();
        echoes.seen.insert("old".to_string(), now_epoch_secs() - 301);
        echoes.record("fresh");
        let removed = echoes.sweep();
        assert_eq!(removed, 1);
        assert!(!echoes.is_local_echo("old"));
        assert!(echoes.is_local_echo("fresh"));
    }
}
