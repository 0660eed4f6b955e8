// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # pvnet - server-side UDP transport core
//!
//! The datagram plane of a pvAccess-style control-system protocol: beacon
//! and discovery traffic, frame-level dispatch, and the registry of active
//! peer transports.
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                        Server Layer                         |
//! |   ServerResponseHandler (28-slot dispatch) | BeaconEmitter  |
//! +-------------------------------------------------------------+
//! |                       Transport Layer                       |
//! |   UdpTransport (receive thread + serialized sends)          |
//! |   TransportRegistry ((address, priority) index)             |
//! +-------------------------------------------------------------+
//! |                        Protocol Layer                       |
//! |   FrameHeader codec | WireBuffer (per-message endianness)   |
//! +-------------------------------------------------------------+
//! ```
//!
//! ## Key types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`UdpTransport`] | Bound datagram socket with one receive thread |
//! | [`ServerResponseHandler`] | Command-indexed frame dispatcher |
//! | [`BeaconEmitter`] | Periodic presence beacon with adaptive cadence |
//! | [`TransportRegistry`] | Thread-safe (address, priority) transport index |
//! | [`Timer`] | Delay scheduler driving the beacon cadence |
//!
//! ## Wire format
//!
//! Datagrams are concatenations of frames, each an 8-byte header
//! (`0xCA | version | flags | command | payload_len`) plus payload. Bit 7
//! of the flags byte declares the message's endianness; the receiver flips
//! its buffer per message. See [`protocol`] for the codec.

/// Wire constants and runtime configuration.
pub mod config;
/// Frame codec and the endian-aware wire buffer.
pub mod protocol;
/// Runtime primitives (timer service).
pub mod rt;
/// Server-side dispatch and beacon emission.
pub mod server;
/// Transport contracts, the UDP transport, and the transport registry.
pub mod transport;

pub use config::BeaconConfig;
pub use protocol::buffer::{ByteOrder, WireBuffer};
pub use protocol::{FrameError, FrameHeader, FrameResult};
pub use rt::{Timer, TimerCallback, TimerNode};
pub use server::{BeaconEmitter, BeaconServerStatusProvider, ServerResponseHandler};
pub use transport::registry::TransportRegistry;
pub use transport::udp::UdpTransport;
pub use transport::{ResponseHandler, Transport, TransportSendControl, TransportSender};

/// Crate version string.
pub const VERSION: &str = "0.2.0";
