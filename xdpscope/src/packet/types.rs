use std::{fmt, net::Ipv4Addr};

use serde::{Serialize, Serializer};
pub use xdpscope_common::TransportProto as Transport;

/// A packet observed by the XDP probe, decoded into host-readable form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Packet {
    pub source: Ipv4Addr,
    pub dest: Ipv4Addr,
    pub source_port: u16,
    pub dest_port: u16,
    #[serde(serialize_with = "serialize_transport")]
    pub transport: Transport,
}

impl Packet {
    pub fn new(
        source: Ipv4Addr,
        source_port: u16,
        dest: Ipv4Addr,
        dest_port: u16,
        transport: Transport,
    ) -> Self {
        Self {
            source,
            dest,
            source_port,
            dest_port,
            transport,
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} ({})",
            self.source,
            self.source_port,
            self.dest,
            self.dest_port,
            self.transport.as_str()
        )
    }
}

fn serialize_transport<S>(transport: &Transport, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(transport.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let packet = Packet::new(
            Ipv4Addr::new(10, 0, 0, 1),
            80,
            Ipv4Addr::new(20, 0, 0, 1),
            443,
            Transport::Tcp,
        );
        assert_eq!(packet.to_string(), "10.0.0.1:80 -> 20.0.0.1:443 (tcp)");
    }

    #[test]
    fn test_serialize_json() {
        let packet = Packet::new(
            Ipv4Addr::new(192, 168, 1, 10),
            53,
            Ipv4Addr::new(8, 8, 8, 8),
            53,
            Transport::Udp,
        );
        let json = serde_json::to_value(packet).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "source": "192.168.1.10",
                "dest": "8.8.8.8",
                "source_port": 53,
                "dest_port": 53,
                "transport": "udp",
            })
        );
    }
}
