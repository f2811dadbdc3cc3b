//! Wire codec for [`ObservedPacket`] records.
//!
//! Addresses are kept as [`Ipv4Addr`] internally. The probe stores `iphdr.saddr`
//! (network order in memory) into a `u32` that is then serialized little-endian,
//! so the octets on the wire are already in display order: decoding takes the
//! little-endian bytes of the integer as the octets, and encoding is the exact
//! inverse.

use std::net::Ipv4Addr;

use thiserror::Error;
use xdpscope_common::{ObservedPacket, RECORD_SIZE};

use crate::packet::types::{Packet, Transport};

/// A record that cannot be turned into a [`Packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed record: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("malformed record: unknown transport discriminant {0}")]
    Transport(u8),
}

/// Decodes one raw record.
pub fn decode(bytes: &[u8]) -> Result<Packet, DecodeError> {
    let raw: &[u8; RECORD_SIZE] = bytes.try_into().map_err(|_| DecodeError::Length {
        expected: RECORD_SIZE,
        actual: bytes.len(),
    })?;
    let record = ObservedPacket::from_le_bytes(raw);

    let transport = Transport::try_from(record.transport).map_err(DecodeError::Transport)?;
    let (source_ip, dest_ip) = (record.source_ip, record.dest_ip);

    Ok(Packet {
        source: addr_from_wire(source_ip),
        dest: addr_from_wire(dest_ip),
        source_port: record.source_port,
        dest_port: record.dest_port,
        transport,
    })
}

/// Encodes a packet into the exact layout the probe produces.
pub fn encode(packet: &Packet) -> [u8; RECORD_SIZE] {
    ObservedPacket {
        source_ip: addr_to_wire(packet.source),
        dest_ip: addr_to_wire(packet.dest),
        source_port: packet.source_port,
        dest_port: packet.dest_port,
        transport: packet.transport as u8,
    }
    .to_le_bytes()
}

fn addr_from_wire(raw: u32) -> Ipv4Addr {
    Ipv4Addr::from(raw.to_le_bytes())
}

fn addr_to_wire(addr: Ipv4Addr) -> u32 {
    u32::from_le_bytes(addr.octets())
}
