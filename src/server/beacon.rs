// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic server-presence beacon.
//!
//! The emitter reschedules itself on an injected [`Timer`]: each firing
//! enqueues the emitter as a send request on the server's UDP transport, and
//! the send itself picks the next delay. Cadence starts fast and drops to
//! the slow period once the count limit has been emitted, so fresh servers
//! are discovered quickly without a standing chatter cost.
//!
//! Beacon payload:
//!
//! ```text
//! sequence_id(u16) | startup_secs(i64) | startup_nanos(i32)
//! | server address (16 bytes, IPv6) | server port (u16)
//! | status introspection + data, or the null descriptor (0xFF)
//! ```

use crate::config::{BeaconConfig, CMD_BEACON};
use crate::protocol::buffer::WireBuffer;
use crate::protocol::encode_ipv6_address;
use crate::rt::{Timer, TimerCallback, TimerNode};
use crate::transport::{Transport, TransportSendControl, TransportSender};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Descriptor sentinel written when no status payload accompanies a beacon.
pub const NULL_TYPE_CODE: u8 = 0xFF;

/// Capacity hint for one beacon message: sequence id, startup time, address
/// block, port.
const BEACON_ENSURE_CAPACITY: usize = 2 + 4 + 4 + 128 + 2;

/// Serializable server-status value attached to beacons.
pub trait StatusData {
    /// Serialize the introspection descriptor for this value.
    fn serialize_introspection(&self, buffer: &mut WireBuffer);
    /// Serialize the value itself.
    fn serialize(&self, buffer: &mut WireBuffer);
}

/// Optional supplier of per-beacon server status.
///
/// Implementations are external code; a panic here is contained and the
/// beacon goes out without status.
pub trait BeaconServerStatusProvider: Send + Sync {
    fn server_status(&self) -> Option<Box<dyn StatusData>>;
}

/// Self-rescheduling emitter of server-presence beacons.
pub struct BeaconEmitter {
    transport: Arc<dyn Transport>,
    beacon_sequence_id: AtomicU16,
    startup_seconds: i64,
    startup_nanos: i32,
    config: BeaconConfig,
    server_address: SocketAddr,
    status_provider: Option<Arc<dyn BeaconServerStatusProvider>>,
    timer: Arc<Timer>,
    node: TimerNode,
    weak_self: Weak<BeaconEmitter>,
}

impl BeaconEmitter {
    /// Create an emitter advertising `server_address` over `transport`.
    pub fn new(
        transport: Arc<dyn Transport>,
        server_address: SocketAddr,
        timer: Arc<Timer>,
        config: BeaconConfig,
        status_provider: Option<Arc<dyn BeaconServerStatusProvider>>,
    ) -> Arc<Self> {
        let startup = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);

        Arc::new_cyclic(|weak: &Weak<BeaconEmitter>| {
            let callback: Weak<dyn TimerCallback> = weak.clone();
            BeaconEmitter {
                transport,
                beacon_sequence_id: AtomicU16::new(0),
                startup_seconds: startup.as_secs() as i64,
                startup_nanos: startup.subsec_nanos() as i32,
                config,
                server_address,
                status_provider,
                timer,
                node: TimerNode::new(callback),
                weak_self: weak.clone(),
            }
        })
    }

    /// Emitter with the default cadence and no status provider.
    pub fn with_defaults(
        transport: Arc<dyn Transport>,
        server_address: SocketAddr,
        timer: Arc<Timer>,
    ) -> Arc<Self> {
        Self::new(transport, server_address, timer, BeaconConfig::default(), None)
    }

    /// Schedule the first beacon immediately.
    pub fn start(&self) {
        self.timer.schedule_after_delay(&self.node, Duration::ZERO);
    }

    /// Cancel the pending schedule. A send already in flight completes but
    /// will not reschedule.
    pub fn destroy(&self) {
        self.node.cancel();
    }

    /// Beacons emitted so far (mod 2^16).
    pub fn sequence_id(&self) -> u16 {
        self.beacon_sequence_id.load(Ordering::Acquire)
    }

    /// Delay until the next beacon: fast until the count limit has been
    /// emitted, slow afterwards.
    fn next_period(&self) -> Duration {
        if self.beacon_sequence_id.load(Ordering::Acquire) >= self.config.count_limit {
            self.config.slow_period
        } else {
            self.config.fast_period
        }
    }

    fn reschedule(&self) {
        self.timer.schedule_after_delay(&self.node, self.next_period());
    }

    /// Query the status provider, containing any panic it raises.
    fn query_status(&self) -> Option<Box<dyn StatusData>> {
        let provider = self.status_provider.as_ref()?;
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| provider.server_status())) {
            Ok(status) => status,
            Err(_) => {
                log::warn!("beacon server status provider panicked; sending beacon without status");
                None
            }
        }
    }
}

impl TimerCallback for BeaconEmitter {
    fn callback(&self) {
        if let Some(emitter) = self.weak_self.upgrade() {
            let sender: Arc<dyn TransportSender> = emitter;
            self.transport.enqueue_send_request(sender);
        }
    }

    fn timer_stopped(&self) {
        // The emitter does not own the timer.
    }
}

impl TransportSender for BeaconEmitter {
    fn send(&self, buffer: &mut WireBuffer, control: &mut dyn TransportSendControl) {
        let status = self.query_status();

        control.start_message(buffer, CMD_BEACON, BEACON_ENSURE_CAPACITY);

        buffer.put_u16(self.beacon_sequence_id.load(Ordering::Acquire));
        buffer.put_i64(self.startup_seconds);
        buffer.put_i32(self.startup_nanos);
        encode_ipv6_address(buffer, &self.server_address);
        buffer.put_u16(self.server_address.port());

        match status {
            Some(status) => {
                status.serialize_introspection(buffer);
                status.serialize(buffer);
            }
            None => buffer.put_u8(NULL_TYPE_CODE),
        }

        control.flush(true);

        // Wraps at 2^16 by construction
        self.beacon_sequence_id.fetch_add(1, Ordering::AcqRel);

        if self.node.is_cancelled() {
            return;
        }
        self.reschedule();
    }
}
