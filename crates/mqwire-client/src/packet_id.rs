//! Packet identifier allocation and tracking.
//!
//! [MQTT-2.3.1-2] requires every new flow to get a currently unused
//! identifier, and [MQTT-2.3.1-3] requires retransmissions to reuse the
//! identifier of the original send. The allocator hands out ids and
//! keeps each one reserved while its flow is unfinished.
//!
//! IDs of cancelled or timed-out publishes are quarantined for a while
//! instead of released: a late ack for the old flow must not be taken
//! as the ack of a new one carrying the same ID.

use std::collections::HashSet;
use std::time::Instant;

/// Hands out the 16-bit nonzero identifiers carried by QoS 1/2
/// PUBLISH, SUBSCRIBE, and UNSUBSCRIBE flows.
#[derive(Debug)]
pub struct PacketIdAllocator {
    /// Next candidate, cycling 1..=65535.
    next_id: u16,
    in_use: HashSet<u16>,
    /// IDs held back after an abandoned flow, with their release times.
    quarantined: Vec<(u16, Instant)>,
}

impl Default for PacketIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketIdAllocator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            in_use: HashSet::new(),
            quarantined: Vec::new(),
        }
    }

    /// Hand out an unused identifier, or `None` when all 65535 are tied
    /// up in unfinished flows.
    pub fn allocate(&mut self) -> Option<u16> {
        for _ in 0..u16::MAX {
            let candidate = self.next_id;
            self.advance();
            if self.in_use.insert(candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// Return an identifier to the pool after its flow completed
    /// normally (PUBACK, PUBCOMP, SUBACK, or UNSUBACK for the id).
    pub fn release(&mut self, id: u16) {
        self.in_use.remove(&id);
    }

    /// Keep `id` reserved until `until` even though its flow is dead.
    pub fn quarantine(&mut self, id: u16, until: Instant) {
        self.in_use.insert(id);
        self.quarantined.push((id, until));
    }

    /// Release quarantined IDs whose hold time has passed.
    pub fn reap(&mut self, now: Instant) {
        let in_use = &mut self.in_use;
        self.quarantined.retain(|&(id, until)| {
            if until <= now {
                in_use.remove(&id);
                false
            } else {
                true
            }
        });
    }

    /// Whether `id` is reserved, in flight or quarantined.
    pub fn is_in_use(&self, id: u16) -> bool {
        self.in_use.contains(&id)
    }

    /// Count of reserved identifiers.
    pub fn in_use_count(&self) -> usize {
        self.in_use.len()
    }

    /// Forget every reservation. Used when a clean session voids all
    /// unfinished flows.
    pub fn clear(&mut self) {
        self.in_use.clear();
        self.quarantined.clear();
        self.next_id = 1;
    }

    fn advance(&mut self) {
        // Identifier 0 is not a legal packet id.
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.next_id = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_allocates_sequentially() {
        let mut alloc = PacketIdAllocator::new();
        assert_eq!(alloc.allocate(), Some(1));
        assert_eq!(alloc.allocate(), Some(2));
        assert_eq!(alloc.allocate(), Some(3));
        assert_eq!(alloc.in_use_count(), 3);
    }

    #[test]
    fn test_release_frees_only_that_id() {
        let mut alloc = PacketIdAllocator::new();
        let first = alloc.allocate().unwrap();
        let second = alloc.allocate().unwrap();

        alloc.release(first);
        assert!(!alloc.is_in_use(first));
        assert!(alloc.is_in_use(second));
    }

    #[test]
    fn test_wraparound_skips_zero() {
        let mut alloc = PacketIdAllocator::new();
        alloc.next_id = 65535;
        assert_eq!(alloc.allocate(), Some(65535));
        assert_eq!(alloc.allocate(), Some(1));
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut alloc = PacketIdAllocator::new();
        alloc.allocate();
        alloc.allocate();

        alloc.clear();
        assert_eq!(alloc.in_use_count(), 0);
        assert_eq!(alloc.allocate(), Some(1));
    }

    #[test]
    fn test_exhaustion() {
        let mut alloc = PacketIdAllocator::new();
        for _ in 0..65535 {
            assert!(alloc.allocate().is_some());
        }
        assert_eq!(alloc.allocate(), None);

        alloc.release(42);
        assert_eq!(alloc.allocate(), Some(42));
    }

    #[test]
    fn test_quarantine_blocks_reuse_until_reaped() {
        let mut alloc = PacketIdAllocator::new();
        let now = Instant::now();
        let id = alloc.allocate().unwrap();

        alloc.quarantine(id, now + Duration::from_secs(30));
        assert!(alloc.is_in_use(id));

        // Not due yet.
        alloc.reap(now + Duration::from_secs(29));
        assert!(alloc.is_in_use(id));

        alloc.reap(now + Duration::from_secs(30));
        assert!(!alloc.is_in_use(id));
    }
}
