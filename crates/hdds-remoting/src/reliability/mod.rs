// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Acknowledged System-Message Delivery
//!
//! Ordered, at-least-once delivery of system messages between two nodes over
//! a transport that may drop, duplicate or reorder frames.
//!
//! ## Protocol Flow
//!
//! ```text
//! Sender                                     Receiver
//!   |                                           |
//!   |--- SYS (seq=0) -------------------------->|  deliver 0
//!   |--- SYS (seq=1) ----------X (lost)         |
//!   |--- SYS (seq=2) -------------------------->|  buffer 2 (gap before it)
//!   |                                           |
//!   |<-- ACK (cumulative=2, nacks={1}) ---------|
//!   |                                           |
//!   |--- SYS (seq=1) [resend] ----------------->|  deliver 1, 2
//!   |<-- ACK (cumulative=2) --------------------|
//! ```
//!
//! ## Components
//!
//! | Component | Role |
//! |-----------|------|
//! | [`SeqNo`] | Wrap-around safe sequence number |
//! | [`Sequenced`] | Message paired with its sequence number |
//! | [`Ack`] | Cumulative acknowledgment plus nacks |
//! | [`AckedSendBuffer`] | Sender keeps messages until acknowledged |
//! | [`AckedReceiveBuffer`] | Receiver deduplicates, reorders, reports gaps |
//!
//! Both buffers are values: every operation returns a new snapshot.

mod ack;
mod receive_buffer;
mod send_buffer;
mod seq;
mod sequenced;

pub use ack::Ack;
pub use receive_buffer::AckedReceiveBuffer;
pub use send_buffer::AckedSendBuffer;
pub use seq::SeqNo;
pub use sequenced::{HasSeqNo, Sequenced};
