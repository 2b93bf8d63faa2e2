//! Secondary 라디오 인터페이스
//!
//! 요청을 기다렸다가 요청마다 정확히 한 번 응답함.
//! 스스로 먼저 송신하지 않고, primary 의 요청에 실린 ack 로만 송신 청크를 확정

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::chunk::TunnelHandle;
use crate::config::Role;
use crate::device::FrameSink;
use crate::link::Link;
use crate::message::{Ping, Request, Response, TunnelTransfer};
use crate::radio::{RadioInterface, SequenceState};
use crate::stats::TunnelStats;
use crate::{Config, Error, Result};

/// Secondary 역할
pub struct Secondary {
    radio: RadioInterface,
    tunnel: TunnelHandle,
    sink: Box<dyn FrameSink>,
}

impl Secondary {
    pub fn new(config: Config, link: Box<dyn Link>, sink: Box<dyn FrameSink>) -> Result<Self> {
        let tunnel = TunnelHandle::new(&config);
        let radio = RadioInterface::new(config, Role::Secondary, link)?;
        Ok(Self {
            radio,
            tunnel,
            sink,
        })
    }

    /// 디바이스 리더가 프레임을 넣을 핸들
    pub fn tunnel(&self) -> TunnelHandle {
        self.tunnel.clone()
    }

    pub fn sequence(&self) -> &SequenceState {
        self.radio.sequence()
    }

    pub fn stats(&self) -> TunnelStats {
        self.radio.stats()
    }

    pub fn stats_handle(&self) -> Arc<RwLock<TunnelStats>> {
        self.radio.stats_handle()
    }

    /// 서비스 루프. 에러는 기록만 하고 다시 대기
    pub async fn run(&mut self) {
        info!(
            "secondary 시작: read={:#010x}, write={:#010x}",
            self.radio.reading_address(),
            self.radio.writing_address()
        );

        loop {
            match self.serve_once().await {
                Ok(()) => {}
                Err(Error::Timeout(_)) => debug!("요청 대기 타임아웃"),
                Err(e) => {
                    warn!("요청 처리 실패: {}", e);
                    // 연속 실패 시 다른 태스크에 양보
                    sleep(self.radio.config().poll_interval).await;
                }
            }
        }
    }

    /// 요청 하나를 기다려 처리하고 응답
    pub async fn serve_once(&mut self) -> Result<()> {
        let listen_timeout = self.radio.config().listen_timeout;
        self.serve_within(listen_timeout).await
    }

    async fn serve_within(&mut self, timeout: Duration) -> Result<()> {
        let request: Request = match self.radio.receive(timeout).await {
            Ok(request) => request,
            Err(e) => {
                match e {
                    Error::MalformedRequest(_) => self.radio.record(|s| s.malformed += 1),
                    Error::ReceiveError(_) => self.radio.record(|s| s.receive_errors += 1),
                    _ => {}
                }
                return Err(e);
            }
        };

        let Some(response) = self.handle_request(request) else {
            return Ok(());
        };

        if let Err(e) = self.radio.send(&response) {
            error!("응답 송신 실패: {}", e);
            self.radio.record(|s| s.transmit_errors += 1);
            return Err(e);
        }

        self.radio.record(|s| s.round_trips += 1);
        Ok(())
    }

    /// 요청 종류별 처리. 응답하지 않을 요청이면 None
    pub fn handle_request(&mut self, request: Request) -> Option<Response> {
        match request {
            Request::Ping(ping) => Some(self.handle_ping(ping)),
            Request::NetworkTunnelTransfer(transfer) => self
                .handle_tunnel_transfer(&transfer)
                .map(Response::NetworkTunnelTransfer),
        }
    }

    fn handle_ping(&self, ping: Ping) -> Response {
        debug!("ping 수신: {:?}", ping.value);
        Response::Ping(Ping::new(ping.value))
    }

    /// 터널 전송 요청 처리
    ///
    /// 필수 필드가 없으면 None (응답 없음). 그 외에는 항상 현재 시퀀스 상태를 담은 응답
    pub fn handle_tunnel_transfer(&mut self, transfer: &TunnelTransfer) -> Option<TunnelTransfer> {
        let Some(id) = transfer.id else {
            error!("터널 전송 요청에 id 없음");
            self.radio.record(|s| s.malformed += 1);
            return None;
        };

        if self.radio.sequence.has_observed_ack() && transfer.ack_id.is_none() {
            error!("터널 전송 요청에 ack_id 없음");
            self.radio.record(|s| s.malformed += 1);
            return None;
        }

        let chunk_size = self.radio.config().chunk_size;

        let (completed, response) = {
            let mut state = self.tunnel.lock();
            let mut completed = None;

            if !self.radio.sequence.validate_id(id) {
                warn!(
                    "비연속 요청 수신: expected {}, got {}",
                    self.radio.sequence.expected_id(),
                    id
                );
                self.radio.record(|s| s.sequence_gaps += 1);
            } else if let Some(payload) = &transfer.payload {
                self.radio.record(|s| s.chunks_received += 1);
                completed = state.reassembly.push_chunk(payload, transfer.remaining());
            }

            if let Some(ack_id) = transfer.ack_id {
                if ack_id == self.radio.sequence.next_id() {
                    self.radio.sequence.advance_id();
                    if state.outbound.acknowledge().is_some() {
                        self.radio.record(|s| s.chunks_sent += 1);
                    }
                } else {
                    warn!(
                        "primary 가 ack 하지 않음 ({} != {}), 청크 재전송 예정",
                        ack_id,
                        self.radio.sequence.next_id()
                    );
                    self.radio.record(|s| s.missed_acks += 1);
                }
            }

            let mut response = TunnelTransfer::new(
                self.radio.sequence.next_id(),
                self.radio.sequence.last_ack_id(),
            );
            if let Some((chunk, remaining)) = state.outbound.offer_chunk(chunk_size) {
                response = response.with_chunk(chunk.to_vec(), remaining);
            }

            (completed, response)
        };

        if let Some(frame) = completed {
            self.deliver(&frame);
        }

        Some(response)
    }

    fn deliver(&mut self, frame: &[u8]) {
        match self.sink.write_frame(frame) {
            Ok(()) => {
                debug!("디바이스에 {} bytes 프레임 쓰기", frame.len());
                let len = frame.len() as u64;
                self.radio.record(|s| {
                    s.frames_delivered += 1;
                    s.bytes_delivered += len;
                });
            }
            Err(e) => {
                error!("디바이스 쓰기 실패 ({} bytes): {}", frame.len(), e);
                self.radio.record(|s| s.device_errors += 1);
            }
        }
    }
}
