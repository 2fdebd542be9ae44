use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use common::err::{CResult, Error};

use crate::PACKET_HEADER_SIZE;

/// Framed packet stream over TCP: 3-byte little-endian length plus a
/// sequence number per packet.
#[derive(Debug)]
pub struct PacketChannel {
    stream: TcpStream,
}

impl PacketChannel {
    pub fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> CResult<Self> {
        let address = format!("{}:{}", host, port);
        let resolved = std::net::ToSocketAddrs::to_socket_addrs(&address)?
            .next()
            .ok_or_else(|| Error::Unavailable(format!("cannot resolve {}", address)))?;
        let stream = TcpStream::connect_timeout(&resolved, connect_timeout)
            .map_err(|e| Error::Unavailable(format!("connect to {} failed: {}", address, e)))?;
        stream.set_read_timeout(read_timeout)?;
        stream.set_write_timeout(write_timeout)?;
        stream.set_nodelay(true)?;
        Ok(PacketChannel { stream })
    }

    pub fn read_packet(&mut self) -> CResult<(Vec<u8>, u8)> {
        let mut header = [0u8; PACKET_HEADER_SIZE];
        self.stream.read_exact(&mut header)?;
        let packet_size = (&header[0..3]).read_u24::<LittleEndian>()?;
        let seq_num = header[3];

        let mut packet = vec![0u8; packet_size as usize];
        self.stream.read_exact(&mut packet)?;
        Ok((packet, seq_num))
    }

    pub fn write_packet(&mut self, packet: &[u8], seq_num: u8) -> CResult<()> {
        self.stream.write_u24::<LittleEndian>(packet.len() as u32)?;
        self.stream.write_u8(seq_num)?;
        self.stream.write_all(packet)?;
        self.stream.flush()?;
        Ok(())
    }

    pub fn shutdown(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
