//! 네트워크 디바이스 경계
//!
//! 재조립이 끝난 프레임은 `FrameSink` 로 쓰고, 디바이스에서 읽은 프레임은
//! `UdpDevice::spawn_reader` 가 `TunnelHandle::push_frame` 으로 송신 큐에 넣음

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chunk::TunnelHandle;

/// 완성 프레임을 받아 쓰는 디바이스
pub trait FrameSink: Send {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;
}

impl FrameSink for mpsc::UnboundedSender<Bytes> {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.send(Bytes::copy_from_slice(frame))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "frame receiver closed"))
    }
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        (**self).write_frame(frame)
    }
}

/// UDP 소켓으로 흉내 낸 네트워크 디바이스
///
/// 로컬 애플리케이션(또는 TUN 브리지)과 datagram 하나 = IP 프레임 하나로 주고받음
#[derive(Debug, Clone)]
pub struct UdpDevice {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl UdpDevice {
    pub async fn bind(local: SocketAddr, peer: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        info!("디바이스 소켓 바인드: {} -> {}", socket.local_addr()?, peer);
        Ok(Self {
            socket: Arc::new(socket),
            peer,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// 디바이스에서 읽은 datagram 을 송신 큐에 넣는 태스크 시작
    pub fn spawn_reader(&self, tunnel: TunnelHandle, max_frame_size: usize) -> JoinHandle<()> {
        let socket = self.socket.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; max_frame_size];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        debug!("디바이스에서 {} bytes 읽음 ({})", len, from);
                        tunnel.push_frame(Bytes::copy_from_slice(&buf[..len]));
                    }
                    Err(e) => {
                        warn!("디바이스 읽기 실패: {}", e);
                        break;
                    }
                }
            }
        })
    }
}

impl FrameSink for UdpDevice {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.socket.try_send_to(frame, self.peer).map(|_| ())
    }
}
