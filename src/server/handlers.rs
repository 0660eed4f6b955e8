// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command-indexed response dispatch.
//!
//! A fixed 28-slot table maps each 8-bit command code to its handler. Only
//! three commands mean anything to a server on the UDP plane: peer beacons
//! (ignored here), connection validation, and echo. Every other slot shares
//! one "bad response" handler that just logs the offender.

use crate::config::CMD_ECHO;
use crate::protocol::buffer::WireBuffer;
use crate::protocol::FrameResult;
use crate::transport::{
    ensure_data, ResponseHandler, Transport, TransportSendControl, TransportSender,
};
use std::net::SocketAddr;
use std::sync::Arc;

/// Number of dispatch slots; commands at or above this are invalid.
pub const HANDLER_TABLE_LENGTH: usize = 28;

/// Debug prologue shared by all handlers.
fn log_received(description: &str, from: SocketAddr, version: u8, command: u8, payload_size: u32) {
    log::debug!(
        "[server] message [{:#04x}, v{:#04x}] received from {} ({}, {} payload bytes)",
        command,
        version,
        from,
        description,
        payload_size
    );
}

/// Top-level dispatcher owned by the server's UDP transport.
pub struct ServerResponseHandler {
    table: [Arc<dyn ResponseHandler>; HANDLER_TABLE_LENGTH],
}

impl ServerResponseHandler {
    pub fn new() -> Self {
        let noop_beacon: Arc<dyn ResponseHandler> = Arc::new(NoopResponse::new("Beacon"));
        let validation: Arc<dyn ResponseHandler> = Arc::new(ConnectionValidationHandler);
        let echo: Arc<dyn ResponseHandler> = Arc::new(EchoHandler);
        let bad: Arc<dyn ResponseHandler> = Arc::new(BadResponse);

        let table = std::array::from_fn(|command| match command {
            0 => Arc::clone(&noop_beacon),
            1 => Arc::clone(&validation),
            2 => Arc::clone(&echo),
            _ => Arc::clone(&bad),
        });
        ServerResponseHandler { table }
    }
}

impl Default for ServerResponseHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseHandler for ServerResponseHandler {
    fn handle_response(
        &self,
        from: SocketAddr,
        transport: &Arc<dyn Transport>,
        version: u8,
        command: u8,
        payload_size: u32,
        buffer: &mut WireBuffer,
    ) -> FrameResult<()> {
        if command as usize >= HANDLER_TABLE_LENGTH {
            log::warn!("Invalid (or unsupported) command: {}.", command);
            // Caller owns the cursor; nothing is consumed here.
            return Ok(());
        }
        self.table[command as usize].handle_response(
            from,
            transport,
            version,
            command,
            payload_size,
            buffer,
        )
    }
}

/// Handler that deliberately ignores its command.
///
/// The server hears peer beacons on the same socket it serves; they carry no
/// server-side meaning at this layer.
struct NoopResponse {
    description: &'static str,
}

impl NoopResponse {
    fn new(description: &'static str) -> Self {
        NoopResponse { description }
    }
}

impl ResponseHandler for NoopResponse {
    fn handle_response(
        &self,
        from: SocketAddr,
        _transport: &Arc<dyn Transport>,
        version: u8,
        command: u8,
        payload_size: u32,
        _buffer: &mut WireBuffer,
    ) -> FrameResult<()> {
        log_received(self.description, from, version, command, payload_size);
        Ok(())
    }
}

/// Fallback for command codes with no assigned handler.
struct BadResponse;

impl ResponseHandler for BadResponse {
    fn handle_response(
        &self,
        from: SocketAddr,
        _transport: &Arc<dyn Transport>,
        version: u8,
        command: u8,
        payload_size: u32,
        _buffer: &mut WireBuffer,
    ) -> FrameResult<()> {
        log_received("Bad response", from, version, command, payload_size);
        log::info!(
            "Undecipherable message (bad response type {}) from {}.",
            command,
            from
        );
        Ok(())
    }
}

/// Applies the peer's connection-validation parameters to the transport.
///
/// Payload: receive buffer size (u32), socket receive buffer size (u32),
/// priority (u16, read and discarded). The peer's minor revision comes from
/// the frame header's version byte.
struct ConnectionValidationHandler;

impl ResponseHandler for ConnectionValidationHandler {
    fn handle_response(
        &self,
        from: SocketAddr,
        transport: &Arc<dyn Transport>,
        version: u8,
        command: u8,
        payload_size: u32,
        buffer: &mut WireBuffer,
    ) -> FrameResult<()> {
        log_received("Connection validation", from, version, command, payload_size);

        ensure_data(buffer, 2 * 4 + 2)?;
        let receive_buffer_size = buffer.get_u32()?;
        let socket_receive_buffer_size = buffer.get_u32()?;
        let _priority = buffer.get_u16()?;

        transport.set_remote_transport_receive_buffer_size(receive_buffer_size);
        transport.set_remote_transport_socket_receive_buffer_size(socket_receive_buffer_size);
        transport.set_remote_minor_revision(version);
        Ok(())
    }
}

/// Replies to an echo request with an empty echo frame.
struct EchoHandler;

impl ResponseHandler for EchoHandler {
    fn handle_response(
        &self,
        from: SocketAddr,
        transport: &Arc<dyn Transport>,
        version: u8,
        command: u8,
        payload_size: u32,
        _buffer: &mut WireBuffer,
    ) -> FrameResult<()> {
        log_received("Echo", from, version, command, payload_size);

        // Single-use sender; ownership transfers to the send queue and the
        // reply is dropped once sent.
        let reply = Arc::new(EchoTransportSender { recipient: from });
        transport.enqueue_send_request(reply);
        Ok(())
    }
}

/// One-shot sender carrying an empty echo reply back to its source.
struct EchoTransportSender {
    recipient: SocketAddr,
}

impl TransportSender for EchoTransportSender {
    fn send(&self, buffer: &mut WireBuffer, control: &mut dyn TransportSendControl) {
        control.start_message(buffer, CMD_ECHO, 0);
        control.set_recipient(self.recipient);
    }
}
