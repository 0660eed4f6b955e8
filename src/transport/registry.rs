// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry of active peer transports, indexed by remote address and
//! priority.
//!
//! A single mutex guards the two-level map; enumeration copies references
//! out under the lock, so callers always see a consistent snapshot and no
//! user code ever runs while the lock is held.

use super::Transport;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

struct Inner {
    /// address -> (priority -> transport). Inner maps are never left empty.
    transports: HashMap<SocketAddr, BTreeMap<u16, Arc<dyn Transport>>>,
    /// Cached count of (address, priority) pairs.
    transport_count: usize,
}

/// Thread-safe index of active transports.
pub struct TransportRegistry {
    inner: Mutex<Inner>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        TransportRegistry {
            inner: Mutex::new(Inner {
                transports: HashMap::new(),
                transport_count: 0,
            }),
        }
    }

    /// Install a transport under its (remote address, priority) key.
    ///
    /// Replaces any existing entry at the same key; the count only grows for
    /// genuinely new pairs.
    pub fn put(&self, transport: Arc<dyn Transport>) {
        let address = transport.remote_address();
        let priority = transport.priority();

        let mut inner = self.inner.lock();
        let priorities = inner.transports.entry(address).or_default();
        let replaced = priorities.insert(priority, transport);
        if replaced.is_none() {
            inner.transport_count += 1;
        }
    }

    /// Transport at `(address, priority)`, if any.
    pub fn get(&self, address: &SocketAddr, priority: u16) -> Option<Arc<dyn Transport>> {
        let inner = self.inner.lock();
        inner
            .transports
            .get(address)
            .and_then(|priorities| priorities.get(&priority))
            .cloned()
    }

    /// All transports registered for `address`, in priority order.
    pub fn get_all(&self, address: &SocketAddr) -> Vec<Arc<dyn Transport>> {
        let inner = self.inner.lock();
        inner
            .transports
            .get(address)
            .map(|priorities| priorities.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove the entry keyed by `transport`'s address and priority.
    ///
    /// Returns the removed reference so the caller may observe it. The
    /// address slot disappears with its last priority.
    pub fn remove(&self, transport: &Arc<dyn Transport>) -> Option<Arc<dyn Transport>> {
        let address = transport.remote_address();
        let priority = transport.priority();

        let mut inner = self.inner.lock();
        let priorities = inner.transports.get_mut(&address)?;
        let removed = priorities.remove(&priority)?;
        let now_empty = priorities.is_empty();
        inner.transport_count -= 1;
        if now_empty {
            inner.transports.remove(&address);
        }
        Some(removed)
    }

    /// Drop every entry and reset the count.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.transports.clear();
        inner.transport_count = 0;
    }

    /// Snapshot of every registered transport, or `None` when empty.
    pub fn to_array(&self) -> Option<Vec<Arc<dyn Transport>>> {
        let inner = self.inner.lock();
        if inner.transport_count == 0 {
            return None;
        }
        let mut all = Vec::with_capacity(inner.transport_count);
        for priorities in inner.transports.values() {
            all.extend(priorities.values().cloned());
        }
        Some(all)
    }

    /// Number of (address, priority) pairs currently registered.
    pub fn active_count(&self) -> usize {
        self.inner.lock().transport_count
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportSender;
    use std::sync::atomic::{AtomicU8, Ordering};

    /// Minimal transport stub keyed by a fixed address and priority.
    struct StubTransport {
        address: SocketAddr,
        priority: u16,
        revision: AtomicU8,
    }

    impl StubTransport {
        fn new(address: &str, priority: u16) -> Arc<dyn Transport> {
            Arc::new(StubTransport {
                address: address.parse().unwrap(),
                priority,
                revision: AtomicU8::new(0),
            })
        }
    }

    impl Transport for StubTransport {
        fn remote_address(&self) -> SocketAddr {
            self.address
        }
        fn priority(&self) -> u16 {
            self.priority
        }
        fn enqueue_send_request(&self, _sender: Arc<dyn TransportSender>) {}
        fn set_remote_transport_receive_buffer_size(&self, _size: u32) {}
        fn set_remote_transport_socket_receive_buffer_size(&self, _size: u32) {}
        fn set_remote_minor_revision(&self, revision: u8) {
            self.revision.store(revision, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_put_then_get_returns_transport() {
        let registry = TransportRegistry::new();
        let t = StubTransport::new("10.0.0.1:5075", 0);
        registry.put(t.clone());

        let found = registry
            .get(&t.remote_address(), 0)
            .expect("transport present after put");
        assert!(Arc::ptr_eq(&found, &t));
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_same_key_replaces_without_count_growth() {
        let registry = TransportRegistry::new();
        let first = StubTransport::new("10.0.0.1:5075", 0);
        let second = StubTransport::new("10.0.0.1:5075", 0);
        registry.put(first.clone());
        registry.put(second.clone());

        assert_eq!(registry.active_count(), 1);
        let found = registry.get(&first.remote_address(), 0).unwrap();
        assert!(Arc::ptr_eq(&found, &second), "most recent wins on collision");
    }

    #[test]
    fn test_remove_returns_reference_and_prunes_address() {
        let registry = TransportRegistry::new();
        let t = StubTransport::new("10.0.0.2:5075", 7);
        registry.put(t.clone());

        let removed = registry.remove(&t).expect("entry existed");
        assert!(Arc::ptr_eq(&removed, &t));
        assert_eq!(registry.active_count(), 0);
        assert!(registry.get(&t.remote_address(), 7).is_none());
        assert!(registry.to_array().is_none(), "empty registry yields None");

        // Second remove is a no-op
        assert!(registry.remove(&t).is_none());
    }

    #[test]
    fn test_multiple_priorities_per_address() {
        let registry = TransportRegistry::new();
        let t1 = StubTransport::new("10.0.0.3:5075", 0);
        let t2 = StubTransport::new("10.0.0.3:5075", 1);
        registry.put(t1.clone());
        registry.put(t2.clone());
        assert_eq!(registry.active_count(), 2);

        let removed = registry.remove(&t1).expect("t1 registered");
        assert!(Arc::ptr_eq(&removed, &t1));
        assert_eq!(registry.active_count(), 1);

        let remaining = registry.get_all(&t1.remote_address());
        assert_eq!(remaining.len(), 1);
        assert!(Arc::ptr_eq(&remaining[0], &t2));
    }

    #[test]
    fn test_get_all_is_priority_ordered() {
        let registry = TransportRegistry::new();
        let high = StubTransport::new("10.0.0.4:5075", 9);
        let low = StubTransport::new("10.0.0.4:5075", 1);
        let mid = StubTransport::new("10.0.0.4:5075", 5);
        registry.put(high.clone());
        registry.put(low.clone());
        registry.put(mid.clone());

        let all = registry.get_all(&low.remote_address());
        let priorities: Vec<u16> = all.iter().map(|t| t.priority()).collect();
        assert_eq!(priorities, vec![1, 5, 9]);
    }

    #[test]
    fn test_clear_resets_everything() {
        let registry = TransportRegistry::new();
        registry.put(StubTransport::new("10.0.0.5:5075", 0));
        registry.put(StubTransport::new("10.0.0.6:5075", 0));
        assert_eq!(registry.active_count(), 2);

        registry.clear();
        assert_eq!(registry.active_count(), 0);
        assert!(registry.to_array().is_none());
    }

    #[test]
    fn test_to_array_counts_every_pair() {
        let registry = TransportRegistry::new();
        registry.put(StubTransport::new("10.0.0.7:5075", 0));
        registry.put(StubTransport::new("10.0.0.7:5075", 1));
        registry.put(StubTransport::new("10.0.0.8:5075", 0));

        let all = registry.to_array().expect("non-empty registry");
        assert_eq!(all.len(), 3);
        assert_eq!(registry.active_count(), 3);
    }

    #[test]
    fn test_concurrent_put_remove_keeps_count_consistent() {
        let registry = Arc::new(TransportRegistry::new());
        let mut handles = Vec::new();
        for worker in 0..4u16 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                for round in 0..50u16 {
                    let t = StubTransport::new(&format!("10.1.{}.1:5075", worker), round % 8);
                    registry.put(t.clone());
                    registry.remove(&t);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.active_count(), 0);
        assert!(registry.to_array().is_none());
    }
}
