//! UDP 기반 링크
//!
//! 라디오 대신 UDP datagram 으로 물리 프레임을 흉내 냄.
//! datagram 구조: `[address u32 LE][payload][crc32 LE]`, CRC 는 address + payload 대상

use std::io;
use std::net::SocketAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use crate::link::{check_payload_size, Frame, Link, LinkError};

const ADDRESS_LEN: usize = 4;
const CRC_LEN: usize = 4;

/// UDP 링크 한쪽 끝
#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
    remote: SocketAddr,
    reading_address: u32,
    writing_address: u32,
    max_payload_size: usize,
    recv_buf: Vec<u8>,
}

impl UdpLink {
    pub async fn bind(
        local: SocketAddr,
        remote: SocketAddr,
        reading_address: u32,
        writing_address: u32,
        max_payload_size: usize,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        debug!(
            "UDP 링크 바인드: {} -> {} (read={:#010x}, write={:#010x})",
            socket.local_addr()?,
            remote,
            reading_address,
            writing_address
        );

        Ok(Self {
            socket,
            remote,
            reading_address,
            writing_address,
            max_payload_size,
            recv_buf: vec![0u8; ADDRESS_LEN + max_payload_size + CRC_LEN],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn send_datagram(&self, address: u32, payload: &[u8]) -> Result<(), LinkError> {
        let datagram = encode_datagram(address, payload);
        match self.socket.try_send_to(&datagram, self.remote) {
            Ok(_) => Ok(()),
            Err(e) => Err(LinkError::Transmit(e.to_string())),
        }
    }
}

/// 프레임을 datagram 으로 인코딩
pub fn encode_datagram(address: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(ADDRESS_LEN + payload.len() + CRC_LEN);
    buf.put_u32_le(address);
    buf.put_slice(payload);
    let crc = crc32fast::hash(&buf);
    buf.put_u32_le(crc);
    buf.freeze()
}

/// datagram 을 프레임으로 디코딩 (CRC 검증 포함)
pub fn decode_datagram(datagram: &[u8]) -> Result<Frame, LinkError> {
    if datagram.len() < ADDRESS_LEN + CRC_LEN {
        return Err(LinkError::Receive(format!(
            "datagram 이 너무 짧음: {} bytes",
            datagram.len()
        )));
    }

    let (body, mut crc_bytes) = datagram.split_at(datagram.len() - CRC_LEN);
    let expected = crc_bytes.get_u32_le();
    let got = crc32fast::hash(body);
    if expected != got {
        return Err(LinkError::CrcMismatch { expected, got });
    }

    let mut body = body;
    let address = body.get_u32_le();
    Ok(Frame::new(address, Bytes::copy_from_slice(body)))
}

impl Link for UdpLink {
    fn transmit(&mut self, frame: &Frame) -> Result<(), LinkError> {
        check_payload_size(frame, self.max_payload_size)?;
        self.send_datagram(frame.address, &frame.payload)
    }

    fn receive(&mut self) -> Result<Option<Frame>, LinkError> {
        loop {
            let len = match self.socket.try_recv_from(&mut self.recv_buf) {
                Ok((len, _)) => len,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(LinkError::Io(e)),
            };

            let frame = decode_datagram(&self.recv_buf[..len])?;
            if frame.address != self.reading_address {
                trace!("다른 채널 프레임 무시: {:#010x}", frame.address);
                continue;
            }
            return Ok(Some(frame));
        }
    }

    fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    fn beacon(&mut self) -> Result<(), LinkError> {
        self.send_datagram(self.writing_address, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn pair() -> (UdpLink, UdpLink) {
        let a_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let a_addr = a_socket.local_addr().unwrap();
        let b_addr = b_socket.local_addr().unwrap();
        drop((a_socket, b_socket));

        let a = UdpLink::bind(a_addr, b_addr, 2, 1, 32).await.unwrap();
        let b = UdpLink::bind(b_addr, a_addr, 1, 2, 32).await.unwrap();
        (a, b)
    }

    async fn receive_within(link: &mut UdpLink, timeout: Duration) -> Result<Option<Frame>, LinkError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match link.receive()? {
                Some(frame) => return Ok(Some(frame)),
                None if tokio::time::Instant::now() >= deadline => return Ok(None),
                None => tokio::time::sleep(Duration::from_millis(2)).await,
            }
        }
    }

    #[test]
    fn test_datagram_layout() {
        let datagram = encode_datagram(0x0102_0304, &[0xAA, 0xBB]);
        assert_eq!(datagram.len(), 10);
        assert_eq!(&datagram[..4], &[0x04, 0x03, 0x02, 0x01]);

        let frame = decode_datagram(&datagram).unwrap();
        assert_eq!(frame.address, 0x0102_0304);
        assert_eq!(frame.payload.as_ref(), &[0xAA, 0xBB]);
    }

    #[test]
    fn test_corrupted_datagram_rejected() {
        let mut datagram = encode_datagram(7, b"payload").to_vec();
        datagram[5] ^= 0x01;
        assert!(matches!(
            decode_datagram(&datagram),
            Err(LinkError::CrcMismatch { .. })
        ));

        assert!(decode_datagram(&[1, 2, 3]).is_err());
    }

    #[tokio::test]
    async fn test_frames_and_beacons_cross_link() {
        let (mut a, mut b) = pair().await;

        a.transmit(&Frame::new(1, vec![9, 8, 7])).unwrap();
        let frame = receive_within(&mut b, Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), &[9, 8, 7]);

        b.beacon().unwrap();
        let beacon = receive_within(&mut a, Duration::from_secs(1)).await.unwrap().unwrap();
        assert!(beacon.is_beacon());
        assert_eq!(beacon.address, 2);
    }

    #[tokio::test]
    async fn test_foreign_channel_ignored() {
        let (mut a, mut b) = pair().await;

        // b 는 주소 1 만 읽음
        a.transmit(&Frame::new(3, vec![1])).unwrap();
        assert!(receive_within(&mut b, Duration::from_millis(100))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, _b) = pair().await;
        let result = a.transmit(&Frame::new(1, vec![0u8; 33]));
        assert!(matches!(result, Err(LinkError::TooLarge { size: 33, max: 32 })));
    }
}
