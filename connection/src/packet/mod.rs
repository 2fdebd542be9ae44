pub mod channel;
pub mod err_packet;
pub mod handshake_packet;

pub use channel::PacketChannel;
pub use err_packet::ErrPacket;
pub use handshake_packet::HandshakePacket;
