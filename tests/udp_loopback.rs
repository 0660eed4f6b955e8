// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end datagram scenarios over loopback sockets.
//!
//! A real `UdpTransport` runs the server dispatcher while a plain client
//! socket injects datagrams and observes replies.

use pvnet::{ServerResponseHandler, UdpTransport};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MAGIC: u8 = 0xCA;
const VERSION: u8 = 1;
const CMD_ECHO: u8 = 2;

/// Build one little-endian frame.
fn frame(command: u8, payload: &[u8]) -> Vec<u8> {
    let mut datagram = vec![MAGIC, VERSION, 0x00, command];
    datagram.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    datagram.extend_from_slice(payload);
    datagram
}

struct Harness {
    transport: Arc<UdpTransport>,
    client: UdpSocket,
    server_addr: SocketAddr,
}

impl Harness {
    fn start() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let transport = UdpTransport::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(ServerResponseHandler::new()),
        )
        .expect("bind server transport");
        transport.start().expect("spawn receive thread");

        let client = UdpSocket::bind("127.0.0.1:0").expect("bind client socket");
        client
            .set_read_timeout(Some(Duration::from_millis(500)))
            .expect("client read timeout");

        let server_addr = transport.local_address();
        Harness {
            transport,
            client,
            server_addr,
        }
    }

    fn send(&self, datagram: &[u8]) {
        self.client
            .send_to(datagram, self.server_addr)
            .expect("send to server");
    }

    fn recv(&self) -> Option<Vec<u8>> {
        let mut datagram = [0u8; 1500];
        match self.client.recv_from(&mut datagram) {
            Ok((len, from)) => {
                assert_eq!(from, self.server_addr, "replies come from the server socket");
                Some(datagram[..len].to_vec())
            }
            Err(err)
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                None
            }
            Err(err) => panic!("client recv failed: {}", err),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.transport.close(false, true);
    }
}

fn assert_empty_echo_reply(reply: &[u8]) {
    assert_eq!(reply.len(), 8, "echo reply is a bare header");
    assert_eq!(reply[0], MAGIC);
    assert_eq!(reply[3], CMD_ECHO);
    let payload_len = u32::from_le_bytes([reply[4], reply[5], reply[6], reply[7]]);
    assert_eq!(payload_len, 0);
}

#[test]
fn echo_request_gets_one_empty_reply() {
    let harness = Harness::start();
    harness.send(&frame(CMD_ECHO, &[]));

    let reply = harness.recv().expect("one echo reply");
    assert_empty_echo_reply(&reply);
    assert!(harness.recv().is_none(), "exactly one reply per request");
}

#[test]
fn two_frames_in_one_datagram_get_two_replies() {
    let harness = Harness::start();
    let mut datagram = frame(CMD_ECHO, &[]);
    datagram.extend_from_slice(&frame(CMD_ECHO, &[]));
    harness.send(&datagram);

    let first = harness.recv().expect("reply to first frame");
    let second = harness.recv().expect("reply to second frame");
    assert_empty_echo_reply(&first);
    assert_empty_echo_reply(&second);
}

#[test]
fn bad_magic_drops_datagram_but_not_transport() {
    let harness = Harness::start();

    // Bad magic: whole datagram dropped, nothing dispatched
    harness.send(&[0xFF, 0x01, 0x00, 0x01, 0, 0, 0, 0]);
    assert!(harness.recv().is_none(), "no reply for an invalid frame");

    // The next datagram is processed normally
    harness.send(&frame(CMD_ECHO, &[]));
    let reply = harness.recv().expect("transport still alive");
    assert_empty_echo_reply(&reply);
}

#[test]
fn bad_magic_in_second_frame_aborts_rest_of_datagram() {
    let harness = Harness::start();
    let mut datagram = frame(CMD_ECHO, &[]);
    datagram.extend_from_slice(&[0xFF, 0x01, 0x00, 0x02, 0, 0, 0, 0]);
    datagram.extend_from_slice(&frame(CMD_ECHO, &[]));
    harness.send(&datagram);

    let reply = harness.recv().expect("first frame still dispatched");
    assert_empty_echo_reply(&reply);
    assert!(
        harness.recv().is_none(),
        "frames after the bad magic are dropped"
    );
}

#[test]
fn unknown_command_is_logged_not_answered() {
    let harness = Harness::start();
    harness.send(&frame(99, &[1, 2, 3]));
    assert!(harness.recv().is_none());

    // No state was disturbed
    assert_eq!(harness.transport.remote_receive_buffer_size(), 0);
}

#[test]
fn payload_overrun_drops_datagram() {
    let harness = Harness::start();
    // Header declares 64 payload bytes, only 2 follow
    let mut datagram = vec![MAGIC, VERSION, 0x00, CMD_ECHO];
    datagram.extend_from_slice(&64u32.to_le_bytes());
    datagram.extend_from_slice(&[0xAA, 0xBB]);
    harness.send(&datagram);

    assert!(harness.recv().is_none());
}

#[test]
fn connection_validation_updates_transport_state() {
    let harness = Harness::start();

    let mut payload = Vec::new();
    payload.extend_from_slice(&0x0001_0000u32.to_le_bytes());
    payload.extend_from_slice(&0x0002_0000u32.to_le_bytes());
    payload.extend_from_slice(&0x0001u16.to_le_bytes());
    harness.send(&frame(1, &payload));

    // Handlers run on the receive thread; poll briefly for the effect
    let deadline = Instant::now() + Duration::from_secs(2);
    while harness.transport.remote_receive_buffer_size() == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }

    assert_eq!(harness.transport.remote_receive_buffer_size(), 65536);
    assert_eq!(harness.transport.remote_socket_receive_buffer_size(), 131072);
    assert_eq!(harness.transport.remote_minor_revision(), VERSION);
    assert!(harness.recv().is_none(), "validation produces no reply");
}

#[test]
fn under_length_validation_is_a_contained_framing_error() {
    let harness = Harness::start();
    harness.send(&frame(1, &[0u8; 4]));
    assert!(harness.recv().is_none());
    assert_eq!(harness.transport.remote_receive_buffer_size(), 0);

    // The receive loop survives the handler error
    harness.send(&frame(CMD_ECHO, &[]));
    assert_empty_echo_reply(&harness.recv().expect("still serving"));
}

#[test]
fn ignored_source_addresses_are_dropped() {
    let _ = env_logger::builder().is_test(true).try_init();

    let transport = UdpTransport::bind(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(ServerResponseHandler::new()),
    )
    .expect("bind server transport");
    transport.set_ignore_addresses(vec!["127.0.0.1".parse().unwrap()]);
    transport.start().expect("spawn receive thread");

    let client = UdpSocket::bind("127.0.0.1:0").expect("client bind");
    client
        .set_read_timeout(Some(Duration::from_millis(400)))
        .unwrap();
    client
        .send_to(&frame(CMD_ECHO, &[]), transport.local_address())
        .expect("send");

    let mut reply = [0u8; 64];
    assert!(
        client.recv_from(&mut reply).is_err(),
        "datagrams from ignored addresses never reach the dispatcher"
    );
    transport.close(false, true);
}

#[test]
fn close_signals_receive_thread_promptly() {
    let harness = Harness::start();
    let started = Instant::now();
    harness.transport.close(false, true);
    assert!(harness.transport.is_closed());
    // One receive timeout plus slack
    assert!(started.elapsed() < Duration::from_secs(3));
}
