#![no_std]

/// Name of the BPF ring buffer map populated by `xdp_ingress_ring`.
pub const RING_MAP_NAME: &str = "ring_observed_packets";
/// Name of the BPF perf event array populated by `xdp_ingress_perf`.
pub const PERF_MAP_NAME: &str = "perf_observed_packets";

/// XDP program that submits records through the ring buffer.
pub const RING_PROGRAM_NAME: &str = "xdp_ingress_ring";
/// XDP program that submits records through the per-CPU perf buffers.
pub const PERF_PROGRAM_NAME: &str = "xdp_ingress_perf";

/// Size in bytes of one record on the wire.
pub const RECORD_SIZE: usize = 13;

/// Record emitted by the XDP probe for every observed IPv4 packet.
///
/// The layout is packed and every multi-byte field is little-endian, matching
/// what the probe writes with `bpf_ringbuf_output` / `bpf_perf_event_output`.
///
/// | offset | field       | width |
/// |--------|-------------|-------|
/// | 0      | source_ip   | 4     |
/// | 4      | dest_ip     | 4     |
/// | 8      | source_port | 2     |
/// | 10     | dest_port   | 2     |
/// | 12     | transport   | 1     |
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservedPacket {
    /// IPv4 source address as read from `iphdr.saddr` on a little-endian host.
    pub source_ip: u32,
    /// IPv4 destination address as read from `iphdr.daddr` on a little-endian host.
    pub dest_ip: u32,
    pub source_port: u16,
    pub dest_port: u16,
    /// Transport discriminant, see [`TransportProto`].
    pub transport: u8,
}

const _: () = assert!(core::mem::size_of::<ObservedPacket>() == RECORD_SIZE);

impl ObservedPacket {
    /// Reads a record from its wire representation.
    pub fn from_le_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        Self {
            source_ip: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            dest_ip: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            source_port: u16::from_le_bytes([bytes[8], bytes[9]]),
            dest_port: u16::from_le_bytes([bytes[10], bytes[11]]),
            transport: bytes[12],
        }
    }

    /// Writes the record in its wire representation.
    pub fn to_le_bytes(&self) -> [u8; RECORD_SIZE] {
        // copy out of the packed struct before taking byte views
        let (source_ip, dest_ip) = (self.source_ip, self.dest_ip);
        let (source_port, dest_port) = (self.source_port, self.dest_port);

        let mut out = [0u8; RECORD_SIZE];
        out[0..4].copy_from_slice(&source_ip.to_le_bytes());
        out[4..8].copy_from_slice(&dest_ip.to_le_bytes());
        out[8..10].copy_from_slice(&source_port.to_le_bytes());
        out[10..12].copy_from_slice(&dest_port.to_le_bytes());
        out[12] = self.transport;
        out
    }
}

/// Transport protocol as encoded by the probe (C enum `{ TCP, UDP }`).
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TransportProto {
    Tcp = 0,
    Udp = 1,
}

impl TransportProto {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProto::Tcp => "tcp",
            TransportProto::Udp => "udp",
        }
    }
}

impl TryFrom<u8> for TransportProto {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TransportProto::Tcp),
            1 => Ok(TransportProto::Udp),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observed_packet_size() {
        assert_eq!(core::mem::size_of::<ObservedPacket>(), RECORD_SIZE);
        assert_eq!(core::mem::align_of::<ObservedPacket>(), 1);
    }

    #[test]
    fn test_from_le_bytes_field_offsets() {
        let bytes = [1, 2, 3, 4, 5, 6, 7, 8, 0x34, 0x12, 0x78, 0x56, 1];
        let record = ObservedPacket::from_le_bytes(&bytes);

        let (source_ip, dest_ip) = (record.source_ip, record.dest_ip);
        let (source_port, dest_port) = (record.source_port, record.dest_port);
        assert_eq!(source_ip, 0x04030201);
        assert_eq!(dest_ip, 0x08070605);
        assert_eq!(source_port, 0x1234);
        assert_eq!(dest_port, 0x5678);
        assert_eq!(record.transport, 1);
    }

    #[test]
    fn test_to_le_bytes_reproduces_layout() {
        let bytes = [10, 0, 0, 1, 20, 0, 0, 1, 0x50, 0x00, 0x00, 0x50, 0x00];
        assert_eq!(ObservedPacket::from_le_bytes(&bytes).to_le_bytes(), bytes);
    }

    #[test]
    fn test_transport_proto_try_from() {
        assert_eq!(TransportProto::try_from(0), Ok(TransportProto::Tcp));
        assert_eq!(TransportProto::try_from(1), Ok(TransportProto::Udp));
        assert_eq!(TransportProto::try_from(2), Err(2));
        assert_eq!(TransportProto::try_from(255), Err(255));
    }

    #[test]
    fn test_transport_proto_as_str() {
        assert_eq!(TransportProto::Tcp.as_str(), "tcp");
        assert_eq!(TransportProto::Udp.as_str(), "udp");
    }
}
