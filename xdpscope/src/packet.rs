//! Decoded packet events and the wire codec for probe records.
//!
//! The probe emits fixed 13-byte [`xdpscope_common::ObservedPacket`] records.
//! `codec` turns those bytes into [`types::Packet`] values (and back, for tests
//! and tooling), rejecting anything that does not match the layout exactly.

pub mod codec;
pub mod types;

pub use codec::{DecodeError, decode, encode};
pub use types::{Packet, Transport};
