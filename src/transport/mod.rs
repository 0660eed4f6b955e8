// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport layer: contracts, the UDP datagram transport, and the registry
//! of active peer transports.
//!
//! The traits here are the seams between the datagram plane and everything
//! above it. A [`Transport`] owns a socket plus framing state for one peer
//! or group; a [`TransportSender`] is a unit of outbound work serialized
//! through the transport's send path; a [`ResponseHandler`] interprets one
//! received frame.

pub mod registry;
pub mod udp;

use crate::protocol::buffer::{BufferError, WireBuffer};
use crate::protocol::FrameResult;
use std::net::SocketAddr;
use std::sync::Arc;

/// An endpoint owning a socket and send/receive framing state.
pub trait Transport: Send + Sync {
    /// Remote address this transport talks to (the bind address for a
    /// broadcast/group transport).
    fn remote_address(&self) -> SocketAddr;

    /// Priority distinguishing multiple transports to the same peer.
    fn priority(&self) -> u16;

    /// Serialize one outbound request through this transport's send path.
    ///
    /// Ownership of single-use senders transfers to the call; they are
    /// dropped once the send completes.
    fn enqueue_send_request(&self, sender: Arc<dyn TransportSender>);

    /// Record the peer's advertised receive buffer size.
    fn set_remote_transport_receive_buffer_size(&self, size: u32);

    /// Record the peer's advertised socket (`SO_RCVBUF`) receive buffer size.
    fn set_remote_transport_socket_receive_buffer_size(&self, size: u32);

    /// Record the peer's minor protocol revision.
    fn set_remote_minor_revision(&self, revision: u8);
}

/// Outbound work item executed under the transport's send lock.
///
/// Call order is `lock()`, `send(..)`, `unlock()`; `unlock()` runs even when
/// `send` panics.
pub trait TransportSender: Send + Sync {
    fn lock(&self) {}

    /// Write one or more messages into `buffer` via `control`.
    fn send(&self, buffer: &mut WireBuffer, control: &mut dyn TransportSendControl);

    fn unlock(&self) {}
}

/// Framing and routing controls available to a sender while it runs.
pub trait TransportSendControl {
    /// Record the message start and write the placeholder frame header
    /// (payload length 0), reserving `ensure_capacity` payload bytes.
    fn start_message(&mut self, buffer: &mut WireBuffer, command: u8, ensure_capacity: usize);

    /// Back-patch the payload length of the message opened by
    /// [`start_message`](Self::start_message).
    fn end_message(&mut self, buffer: &mut WireBuffer);

    /// Switch the pending datagram from the broadcast send-list to a single
    /// recipient.
    fn set_recipient(&mut self, recipient: SocketAddr);

    /// Mark the end of a message batch. Datagram transports send the buffer
    /// whole once the enqueued request completes, so this needs no work
    /// there.
    fn flush(&mut self, last: bool);
}

/// Command-indexed interpreter for received frames.
///
/// Handlers run on the transport's receive thread. The transport repositions
/// the cursor after each dispatch, so a handler that under-reads cannot
/// desynchronize later frames; a handler that over-reads gets a framing
/// error from the buffer.
pub trait ResponseHandler: Send + Sync {
    fn handle_response(
        &self,
        from: SocketAddr,
        transport: &Arc<dyn Transport>,
        version: u8,
        command: u8,
        payload_size: u32,
        buffer: &mut WireBuffer,
    ) -> FrameResult<()>;
}

/// Verify that at least `needed` payload bytes remain.
pub fn ensure_data(buffer: &WireBuffer, needed: usize) -> FrameResult<()> {
    if buffer.remaining() < needed {
        return Err(BufferError::Underflow {
            offset: buffer.position(),
            needed,
        }
        .into());
    }
    Ok(())
}
