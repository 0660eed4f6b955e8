// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Blocking UDP transport with a dedicated receive thread.
//!
//! One transport owns one bound datagram socket. Receives happen on a single
//! named thread with a 1-second socket timeout so shutdown never waits on a
//! blocked `recv_from`; sends are serialized through a mutex-guarded send
//! buffer and go either to the configured broadcast send-list or to the
//! recipient a sender picks via [`TransportSendControl::set_recipient`].
//!
//! Frames are walked in wire order within each datagram. The cursor is
//! repositioned after every dispatch, so a handler that under-reads cannot
//! desynchronize the frames that follow it; a bad magic abandons the whole
//! datagram.

use crate::config::{MAX_UDP_RECV, PV_MESSAGE_HEADER_SIZE};
use crate::protocol::buffer::WireBuffer;
use crate::protocol::FrameHeader;
use crate::transport::{ResponseHandler, Transport, TransportSendControl, TransportSender};
use parking_lot::{Condvar, Mutex};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long `close` waits for the receive thread to acknowledge shutdown.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

/// Socket receive timeout bounding each `recv_from` call.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// One-shot event the receive thread signals on exit.
struct ShutdownEvent {
    signaled: Mutex<bool>,
    wakeup: Condvar,
}

impl ShutdownEvent {
    fn new() -> Self {
        ShutdownEvent {
            signaled: Mutex::new(false),
            wakeup: Condvar::new(),
        }
    }

    fn signal(&self) {
        *self.signaled.lock() = true;
        self.wakeup.notify_all();
    }

    /// Wait until signaled or `timeout` elapses; returns the signaled state.
    fn wait(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            self.wakeup.wait_for(&mut signaled, timeout);
        }
        *signaled
    }
}

/// Per-send framing state handed to a [`TransportSender`].
struct UdpSendControl {
    last_message_start: Option<usize>,
    recipient: Option<SocketAddr>,
}

impl UdpSendControl {
    fn new() -> Self {
        UdpSendControl {
            last_message_start: None,
            recipient: None,
        }
    }
}

impl TransportSendControl for UdpSendControl {
    fn start_message(&mut self, buffer: &mut WireBuffer, command: u8, ensure_capacity: usize) {
        self.last_message_start = Some(buffer.position());
        buffer.ensure_capacity(PV_MESSAGE_HEADER_SIZE + ensure_capacity);
        FrameHeader::outgoing(command, 0).encode(buffer);
    }

    fn end_message(&mut self, buffer: &mut WireBuffer) {
        if let Some(start) = self.last_message_start {
            let payload = buffer.position() - start - PV_MESSAGE_HEADER_SIZE;
            // Payload-length field sits 4 bytes into the header
            buffer.put_u32_at(start + 4, payload as u32);
        }
    }

    fn set_recipient(&mut self, recipient: SocketAddr) {
        self.recipient = Some(recipient);
    }

    fn flush(&mut self, _last: bool) {
        // Datagrams go out whole once the enqueued request completes.
    }
}

/// UDP transport: bound socket, receive thread, serialized send path.
pub struct UdpTransport {
    bind_address: SocketAddr,
    socket: Arc<UdpSocket>,
    response_handler: Arc<dyn ResponseHandler>,
    priority: u16,

    closed: AtomicBool,
    /// Serializes the open->closed transition.
    close_guard: Mutex<()>,
    shutdown: ShutdownEvent,
    receive_thread: Mutex<Option<JoinHandle<()>>>,

    send_buffer: Mutex<WireBuffer>,
    send_addresses: Mutex<Vec<SocketAddr>>,
    ignored_addresses: Mutex<Vec<IpAddr>>,

    remote_receive_buffer_size: AtomicU32,
    remote_socket_receive_buffer_size: AtomicU32,
    remote_minor_revision: AtomicU8,
}

// ===== Construction =====

impl UdpTransport {
    /// Bind a datagram socket and wrap it in a transport.
    ///
    /// The socket gets `SO_REUSEADDR`, `SO_BROADCAST` and a 1-second receive
    /// timeout; option failures are logged and tolerated, bind failures are
    /// not. Call [`start`](Self::start) to spawn the receive thread.
    pub fn bind(
        bind_address: SocketAddr,
        response_handler: Arc<dyn ResponseHandler>,
    ) -> io::Result<Arc<Self>> {
        let domain = Domain::for_address(bind_address);
        let raw = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        if let Err(err) = raw.set_reuse_address(true) {
            log::warn!("[udp] failed to set SO_REUSEADDR for {}: {}", bind_address, err);
        }
        if let Err(err) = raw.set_broadcast(true) {
            log::warn!("[udp] failed to set SO_BROADCAST for {}: {}", bind_address, err);
        }
        raw.bind(&bind_address.into())?;

        let socket: UdpSocket = raw.into();
        // Bounded receive so the thread can observe the closed flag; without
        // this, shutdown would hang on a quiet socket.
        if let Err(err) = socket.set_read_timeout(Some(RECEIVE_TIMEOUT)) {
            log::error!(
                "[udp] failed to set SO_RCVTIMEO for UDP socket {}: {}",
                bind_address,
                err
            );
        }
        let bound = socket.local_addr()?;
        log::debug!("[udp] transport bound addr={}", bound);

        Ok(Arc::new(UdpTransport {
            bind_address: bound,
            socket: Arc::new(socket),
            response_handler,
            priority: 0,
            closed: AtomicBool::new(false),
            close_guard: Mutex::new(()),
            shutdown: ShutdownEvent::new(),
            receive_thread: Mutex::new(None),
            send_buffer: Mutex::new(WireBuffer::with_capacity(MAX_UDP_RECV)),
            send_addresses: Mutex::new(Vec::new()),
            ignored_addresses: Mutex::new(Vec::new()),
            remote_receive_buffer_size: AtomicU32::new(0),
            remote_socket_receive_buffer_size: AtomicU32::new(0),
            remote_minor_revision: AtomicU8::new(0),
        }))
    }
}

// ===== Lifecycle =====

impl UdpTransport {
    /// Spawn the single receive thread bound to this transport's lifetime.
    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        let thread_name = format!("udp-receive {}", self.bind_address);
        log::debug!("[udp] starting thread: {}", thread_name);

        let transport = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || transport.receive_loop())?;
        *self.receive_thread.lock() = Some(handle);
        Ok(())
    }

    /// Close the transport. Idempotent.
    ///
    /// With `wait_for_thread`, blocks up to 5 seconds for the receive thread
    /// to signal shutdown and logs an error if it does not; destruction
    /// proceeds regardless.
    pub fn close(&self, forced: bool, wait_for_thread: bool) {
        {
            let _guard = self.close_guard.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            log::debug!(
                "[udp] socket {} closed (forced={})",
                self.bind_address,
                forced
            );
        }

        if wait_for_thread {
            if self.shutdown.wait(SHUTDOWN_WAIT) {
                if let Some(handle) = self.receive_thread.lock().take() {
                    let _ = handle.join();
                }
            } else {
                log::error!(
                    "[udp] receive thread for UDP socket {} has not exited",
                    self.bind_address
                );
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Address the socket actually bound to.
    pub fn local_address(&self) -> SocketAddr {
        self.bind_address
    }

    /// OS-level `SO_RCVBUF` of the bound socket.
    pub fn socket_receive_buffer_size(&self) -> io::Result<usize> {
        SockRef::from(&*self.socket).recv_buffer_size()
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        // The receive thread holds its own Arc, so by the time the last
        // reference drops the thread has already exited; this only covers a
        // transport that was never started or closed.
        self.close(true, false);
    }
}

// ===== Configuration =====

impl UdpTransport {
    /// Destinations for broadcast sends (used when a sender names no
    /// recipient). Set before `start()` or while the transport is idle.
    pub fn set_send_addresses(&self, addresses: Vec<SocketAddr>) {
        *self.send_addresses.lock() = addresses;
    }

    /// Source addresses whose datagrams the receive loop drops.
    /// Set before `start()` or while the transport is idle.
    pub fn set_ignore_addresses(&self, addresses: Vec<IpAddr>) {
        *self.ignored_addresses.lock() = addresses;
    }

    /// Peer receive-buffer size recorded by connection validation.
    pub fn remote_receive_buffer_size(&self) -> u32 {
        self.remote_receive_buffer_size.load(Ordering::Acquire)
    }

    /// Peer socket receive-buffer size recorded by connection validation.
    pub fn remote_socket_receive_buffer_size(&self) -> u32 {
        self.remote_socket_receive_buffer_size.load(Ordering::Acquire)
    }

    /// Peer minor revision recorded by connection validation.
    pub fn remote_minor_revision(&self) -> u8 {
        self.remote_minor_revision.load(Ordering::Acquire)
    }
}

// ===== Send path =====

impl UdpTransport {
    /// Serialize one send through this transport.
    ///
    /// Clears the send buffer, runs the sender between `lock`/`unlock`
    /// (unlock runs even if the sender panics), finalizes the frame, then
    /// sends to the chosen recipient or the broadcast list.
    pub fn enqueue_send_request(&self, sender: Arc<dyn TransportSender>) {
        let mut buffer = self.send_buffer.lock();
        buffer.clear();
        let mut control = UdpSendControl::new();

        sender.lock();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            sender.send(&mut buffer, &mut control);
        }));
        sender.unlock();

        if outcome.is_err() {
            log::warn!(
                "[udp] transport sender panicked; dropping send on {}",
                self.bind_address
            );
            return;
        }

        control.end_message(&mut buffer);
        match control.recipient {
            Some(recipient) => {
                self.send_to(&mut buffer, recipient);
            }
            None => {
                self.send_broadcast(&mut buffer);
            }
        }
    }

    /// One-shot unicast of the flipped send buffer.
    fn send_to(&self, buffer: &mut WireBuffer, address: SocketAddr) -> bool {
        buffer.flip();
        match self.socket.send_to(buffer.as_slice(), address) {
            Ok(_) => true,
            Err(err) => {
                log::debug!("[udp] socket send_to {} error: {}", address, err);
                false
            }
        }
    }

    /// Broadcast the flipped send buffer to the configured send-list.
    /// Returns true only if every destination accepted the datagram.
    fn send_broadcast(&self, buffer: &mut WireBuffer) -> bool {
        let addresses = self.send_addresses.lock();
        if addresses.is_empty() {
            return false;
        }

        buffer.flip();
        let mut all_ok = true;
        for address in addresses.iter() {
            if let Err(err) = self.socket.send_to(buffer.as_slice(), *address) {
                log::debug!("[udp] socket send_to {} error: {}", address, err);
                all_ok = false;
            }
        }
        all_ok
    }
}

// ===== Receive path =====

impl UdpTransport {
    fn receive_loop(self: Arc<Self>) {
        let transport: Arc<dyn Transport> = self.clone() as Arc<dyn Transport>;
        let mut buffer = WireBuffer::with_capacity(MAX_UDP_RECV);

        while !self.closed.load(Ordering::Acquire) {
            buffer.clear();

            match self.socket.recv_from(buffer.storage_mut()) {
                Ok((received, from)) => {
                    if self.is_ignored(&from) {
                        continue;
                    }
                    buffer.set_position(received);
                    buffer.flip();
                    self.process_buffer(&transport, from, &mut buffer);
                }
                Err(err) => {
                    match err.kind() {
                        // Timeout / interrupt / spurious ICMP feedback
                        io::ErrorKind::WouldBlock
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionRefused
                        | io::ErrorKind::ConnectionReset => continue,
                        _ => {
                            if !self.closed.load(Ordering::Acquire) {
                                log::error!("[udp] socket recv_from error: {}", err);
                            }
                            // Cannot wait on our own shutdown event here
                            self.close(true, false);
                            break;
                        }
                    }
                }
            }
        }

        log::debug!(
            "[udp] receive thread for {} exiting",
            self.bind_address
        );
        self.shutdown.signal();
    }

    fn is_ignored(&self, from: &SocketAddr) -> bool {
        let ignored = self.ignored_addresses.lock();
        ignored.iter().any(|addr| *addr == from.ip())
    }

    /// Walk every frame in one datagram, dispatching each to the response
    /// handler. Returns false when a framing error abandons the datagram.
    fn process_buffer(
        &self,
        transport: &Arc<dyn Transport>,
        from: SocketAddr,
        buffer: &mut WireBuffer,
    ) -> bool {
        while buffer.remaining() >= PV_MESSAGE_HEADER_SIZE {
            let header = match FrameHeader::decode(buffer) {
                Ok(header) => header,
                Err(err) => {
                    log::debug!("[udp] dropping datagram from {}: {}", from, err);
                    return false;
                }
            };

            let next_frame = buffer.position() + header.payload_size as usize;

            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                self.response_handler.handle_response(
                    from,
                    transport,
                    header.version,
                    header.command,
                    header.payload_size,
                    buffer,
                )
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::debug!(
                        "[udp] handler for command {} failed (from {}): {}",
                        header.command,
                        from,
                        err
                    );
                }
                Err(_) => {
                    log::error!(
                        "[udp] response handler panicked (command {}, from {})",
                        header.command,
                        from
                    );
                }
            }

            // Realign even if the handler under- or over-read its payload
            buffer.set_position(next_frame);
        }
        true
    }
}

// ===== Transport contract =====

impl Transport for UdpTransport {
    fn remote_address(&self) -> SocketAddr {
        self.bind_address
    }

    fn priority(&self) -> u16 {
        self.priority
    }

    fn enqueue_send_request(&self, sender: Arc<dyn TransportSender>) {
        UdpTransport::enqueue_send_request(self, sender);
    }

    fn set_remote_transport_receive_buffer_size(&self, size: u32) {
        self.remote_receive_buffer_size.store(size, Ordering::Release);
    }

    fn set_remote_transport_socket_receive_buffer_size(&self, size: u32) {
        self.remote_socket_receive_buffer_size
            .store(size, Ordering::Release);
    }

    fn set_remote_minor_revision(&self, revision: u8) {
        self.remote_minor_revision.store(revision, Ordering::Release);
    }
}
