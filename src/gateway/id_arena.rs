use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use crate::shared_types::VirtualId;

/// How long a retired id stays out of circulation when the server never
/// confirms the CLOSE for it.
pub const DEFAULT_ID_REUSE_DELAY: Duration = Duration::from_secs(30);

/// Hands out server-side virtual ids for one physical connection. Freed ids
/// are reused smallest-first; id 0 is never handed out.
///
/// An id the gateway closed on its own is *retired* rather than freed: the
/// server may still send OPENED, DATA or CLOSE for it. It becomes reusable
/// once the server echoes the CLOSE (`release`) or after `reuse_delay`.
#[derive(Debug)]
pub struct IdArena {
    next: VirtualId,
    max: VirtualId,
    free: BTreeSet<VirtualId>,
    reuse_delay: Duration,
    retired: HashMap<VirtualId, Instant>,
    // oldest first; entries released early are skipped when reclaimed
    expiry: VecDeque<(VirtualId, Instant)>,
}

impl Default for IdArena {
    fn default() -> Self {
        Self::new(DEFAULT_ID_REUSE_DELAY)
    }
}

impl IdArena {
    pub fn new(reuse_delay: Duration) -> Self {
        Self::with_max(VirtualId::MAX, reuse_delay)
    }

    pub fn with_max(max: VirtualId, reuse_delay: Duration) -> Self {
        Self {
            next: 1,
            max,
            free: BTreeSet::new(),
            reuse_delay,
            retired: HashMap::new(),
            expiry: VecDeque::new(),
        }
    }

    pub fn alloc(&mut self, now: Instant) -> Option<VirtualId> {
        self.reclaim(now);

        if let Some(id) = self.free.pop_first() {
            return Some(id);
        }

        if self.next == 0 || self.next > self.max {
            return None;
        }

        let id = self.next;
        // wraps to 0 after VirtualId::MAX, which reads as exhausted
        self.next = self.next.wrapping_add(1);
        Some(id)
    }

    /// Make `id` reusable now, whether it was live or retired.
    pub fn release(&mut self, id: VirtualId) {
        self.retired.remove(&id);
        if id != 0 && (self.next == 0 || id < self.next) {
            self.free.insert(id);
        }
    }

    /// Keep `id` out of circulation until `release` or the reuse delay.
    pub fn retire(&mut self, id: VirtualId, now: Instant) {
        if id == 0 {
            return;
        }
        self.retired.insert(id, now);
        self.expiry.push_back((id, now));
    }

    pub fn is_retired(&self, id: VirtualId) -> bool {
        self.retired.contains_key(&id)
    }

    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    fn reclaim(&mut self, now: Instant) {
        while let Some(&(id, at)) = self.expiry.front() {
            if now.duration_since(at) < self.reuse_delay {
                break;
            }
            self.expiry.pop_front();

            // still retired by this entry, not re-retired later
            if self.retired.get(&id) == Some(&at) {
                self.release(id);
            }
        }
    }
}
