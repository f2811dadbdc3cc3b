//! Consumers of decoded packets.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::packet::Packet;

/// Receives every packet the ingestion loop decodes, in read order.
pub trait PacketSink: Send {
    fn accept(&mut self, packet: Packet);
}

impl<F> PacketSink for F
where
    F: FnMut(Packet) + Send,
{
    fn accept(&mut self, packet: Packet) {
        self(packet)
    }
}

/// Output format of [`LogSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// `10.0.0.1:80 -> 20.0.0.1:443 (tcp)`
    #[default]
    Text,
    /// One JSON object per packet.
    Json,
}

/// Logs one line per packet.
#[derive(Debug, Default)]
pub struct LogSink {
    format: LogFormat,
}

impl LogSink {
    pub fn new(format: LogFormat) -> Self {
        Self { format }
    }

    /// Renders the message body for `packet` in the configured format.
    pub fn render(&self, packet: &Packet) -> String {
        match self.format {
            LogFormat::Text => packet.to_string(),
            LogFormat::Json => match serde_json::to_string(packet) {
                Ok(json) => json,
                Err(e) => {
                    warn!(
                        event.name = "sink.serialize_failed",
                        error.message = %e,
                        "failed to serialize packet, falling back to text"
                    );
                    packet.to_string()
                }
            },
        }
    }
}

impl PacketSink for LogSink {
    fn accept(&mut self, packet: Packet) {
        info!(
            event.name = "packet.observed",
            source.address = %packet.source,
            source.port = packet.source_port,
            destination.address = %packet.dest,
            destination.port = packet.dest_port,
            network.transport = packet.transport.as_str(),
            "{}",
            self.render(&packet)
        );
    }
}
