//! Primary 라디오 인터페이스
//!
//! 링크의 유일한 송신 개시자. 왕복마다 요청 하나를 보내고 응답을 기다림.
//! 타임아웃/전송 실패/잘못된 응답이면 같은 요청을 그대로 재전송

use std::sync::Arc;

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

/// Primary 역할
pub struct Primary {
    radio: RadioInterface,
    tunnel: TunnelHandle,
    sink: Box<dyn FrameSink>,

    /// 응답을 받지 못한 요청 (재전송 시 그대로 사용)
    pending_request: Option<Request>,
}

impl Primary {
    pub fn new(config: Config, link: Box<dyn Link>, sink: Box<dyn FrameSink>) -> Result<Self> {
        let tunnel = TunnelHandle::new(&config);
        let radio = RadioInterface::new(config, Role::Primary, link)?;
        Ok(Self {
            radio,
            tunnel,
            sink,
            pending_request: None,
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

    /// ping 왕복 한 번. 응답 값 반환
    pub async fn ping(&mut self, value: Option<u32>) -> Result<Option<u32>> {
        let request = Request::Ping(Ping::new(value));
        self.radio.send(&request)?;

        let timeout = self.radio.config().receive_timeout;
        match self.radio.receive::<Response>(timeout).await? {
            Response::Ping(ping) => {
                if ping.value != value {
                    warn!("ping 값 불일치: sent {:?}, got {:?}", value, ping.value);
                }
                Ok(ping.value)
            }
            other => Err(Error::MalformedRequest(format!(
                "ping 응답 대신 {} 수신",
                other.kind()
            ))),
        }
    }

    /// 전송 루프. 왕복 사이마다 `rf_delay` 대기
    pub async fn run(&mut self) {
        info!(
            "primary 시작: read={:#010x}, write={:#010x}, chunk={} bytes",
            self.radio.reading_address(),
            self.radio.writing_address(),
            self.radio.config().chunk_size
        );

        loop {
            sleep(self.radio.config().rf_delay).await;
            self.radio.maybe_beacon();

            if let Err(e) = self.transfer_once().await {
                match e {
                    Error::Timeout(_) => debug!("응답 타임아웃, 재전송 예정"),
                    e if e.is_retryable() => warn!("터널 왕복 실패, 재전송 예정: {}", e),
                    e => error!("터널 왕복 실패: {}", e),
                }
            }
        }
    }

    /// 터널 전송 왕복 한 번
    ///
    /// 실패하면 요청을 보관해 두었다가 다음 호출에서 그대로 재전송
    pub async fn transfer_once(&mut self) -> Result<()> {
        let request = match self.pending_request.take() {
            Some(request) => {
                self.radio.record(|s| s.retries += 1);
                request
            }
            None => self.build_request(),
        };
        self.pending_request = Some(request.clone());

        if let Err(e) = self.radio.send(&request) {
            self.radio.record(|s| s.transmit_errors += 1);
            return Err(e);
        }

        let timeout = self.radio.config().receive_timeout;
        let response = match self.radio.receive::<Response>(timeout).await {
            Ok(response) => response,
            Err(e) => {
                match e {
                    Error::Timeout(_) => self.radio.record(|s| s.timeouts += 1),
                    Error::MalformedRequest(_) => self.radio.record(|s| s.malformed += 1),
                    Error::ReceiveError(_) => self.radio.record(|s| s.receive_errors += 1),
                    _ => {}
                }
                return Err(e);
            }
        };

        let transfer = match response {
            Response::NetworkTunnelTransfer(transfer) => transfer,
            other => {
                self.radio.record(|s| s.malformed += 1);
                return Err(Error::MalformedRequest(format!(
                    "터널 응답 대신 {} 수신",
                    other.kind()
                )));
            }
        };

        self.handle_tunnel_response(&transfer)?;
        self.pending_request = None;
        self.radio.record(|s| s.round_trips += 1);
        Ok(())
    }

    /// 다음 요청 구성
    ///
    /// 상대 id 를 한 번도 검증하지 못했으면 청크 없이 동기화 요청만 보냄
    fn build_request(&mut self) -> Request {
        let chunk_size = self.radio.config().chunk_size;
        let sequence = &self.radio.sequence;

        let mut transfer = TunnelTransfer::new(sequence.next_id(), sequence.last_ack_id());
        if sequence.has_observed_ack() {
            if let Some((chunk, remaining)) = self.tunnel.lock().outbound.offer_chunk(chunk_size) {
                transfer = transfer.with_chunk(chunk.to_vec(), remaining);
            }
        }

        Request::NetworkTunnelTransfer(transfer)
    }

    /// 터널 응답 처리. 필수 필드가 없으면 `MalformedRequest`
    pub fn handle_tunnel_response(&mut self, transfer: &TunnelTransfer) -> Result<()> {
        let Some(id) = transfer.id else {
            self.radio.record(|s| s.malformed += 1);
            return Err(Error::MalformedRequest("터널 응답에 id 없음".into()));
        };

        if self.radio.sequence.has_observed_ack() && transfer.ack_id.is_none() {
            self.radio.record(|s| s.malformed += 1);
            return Err(Error::MalformedRequest("터널 응답에 ack_id 없음".into()));
        }

        let completed = {
            let mut state = self.tunnel.lock();
            let mut completed = None;

            if self.radio.sequence.validate_id(id) {
                if let Some(payload) = &transfer.payload {
                    self.radio.record(|s| s.chunks_received += 1);
                    completed = state.reassembly.push_chunk(payload, transfer.remaining());
                }
                self.radio.sequence.record_peer_id(id);
            } else {
                warn!(
                    "비연속 응답 수신: expected {}, got {}",
                    self.radio.sequence.expected_id(),
                    id
                );
                self.radio.record(|s| s.sequence_gaps += 1);
            }

            if let Some(ack_id) = transfer.ack_id {
                if ack_id == self.radio.sequence.next_id() {
                    self.radio.sequence.advance_next_id();
                    if state.outbound.acknowledge().is_some() {
                        self.radio.record(|s| s.chunks_sent += 1);
                    }
                } else {
                    warn!(
                        "secondary 가 ack 하지 않음 ({} != {}), 청크 재전송 예정",
                        ack_id,
                        self.radio.sequence.next_id()
                    );
                    self.radio.record(|s| s.missed_acks += 1);
                }
            }

            completed
        };

        if let Some(frame) = completed {
            self.deliver(&frame);
        }

        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::sync::mpsc;

    use crate::link::Frame;
    use crate::message;
    use crate::mock_link::{LoopbackLink, LossyLink, MockLink, MockLinkConfig, ScriptedResult};
    use crate::secondary::Secondary;
    use crate::{DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_PRIMARY_ADDRESS, DEFAULT_SECONDARY_ADDRESS};

    fn primary_with(link: MockLink) -> (Primary, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let primary = Primary::new(Config::default(), Box::new(link), Box::new(tx)).unwrap();
        (primary, rx)
    }

    fn tunnel_response(transfer: TunnelTransfer) -> Frame {
        let bytes = message::encode(&Response::NetworkTunnelTransfer(transfer)).unwrap();
        Frame::new(DEFAULT_SECONDARY_ADDRESS, bytes)
    }

    fn sent_transfers(link: &MockLink) -> Vec<TunnelTransfer> {
        link.transmitted()
            .iter()
            .map(|frame| match message::decode::<Request>(&frame.payload).unwrap() {
                Request::NetworkTunnelTransfer(transfer) => transfer,
                other => panic!("unexpected request: {:?}", other),
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_round_trip() {
        let link = MockLink::new(MockLinkConfig::default());
        let pong = message::encode(&Response::Ping(Ping::new(Some(99)))).unwrap();
        link.push_receive(Frame::new(DEFAULT_SECONDARY_ADDRESS, pong));
        let (mut primary, _rx) = primary_with(link.clone());

        assert_eq!(primary.ping(Some(99)).await.unwrap(), Some(99));

        let sent = link.transmitted();
        assert_eq!(sent[0].address, DEFAULT_PRIMARY_ADDRESS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_timeout() {
        let (mut primary, _rx) = primary_with(MockLink::new(MockLinkConfig::default()));
        assert!(matches!(primary.ping(None).await, Err(Error::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_sync_round() {
        let link = MockLink::new(MockLinkConfig::default());
        let (mut primary, _rx) = primary_with(link.clone());
        primary.tunnel().push_frame(vec![1u8; 4]);

        link.push_receive(tunnel_response(TunnelTransfer::new(1, None)));
        primary.transfer_once().await.unwrap();

        let sent = sent_transfers(&link);
        assert_eq!(sent[0].id, Some(1));
        assert!(sent[0].ack_id.is_none());
        assert!(sent[0].payload.is_none());
        assert_eq!(primary.sequence().last_ack_id(), Some(1));
        // ack 없는 응답이므로 next_id 는 그대로
        assert_eq!(primary.sequence().next_id(), 1);

        link.push_receive(tunnel_response(TunnelTransfer::new(2, Some(1))));
        primary.transfer_once().await.unwrap();

        let sent = sent_transfers(&link);
        assert_eq!(sent[1].id, Some(1));
        assert_eq!(sent[1].ack_id, Some(1));
        assert_eq!(sent[1].payload.as_deref(), Some(&[1u8; 4][..]));
        assert_eq!(primary.sequence().next_id(), 2);
        assert_eq!(primary.tunnel().pending_frames(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resends_identical_request() {
        let link = MockLink::new(MockLinkConfig::default());
        let (mut primary, _rx) = primary_with(link.clone());

        assert!(matches!(
            primary.transfer_once().await,
            Err(Error::Timeout(_))
        ));
        link.push_receive(tunnel_response(TunnelTransfer::new(1, None)));
        primary.transfer_once().await.unwrap();

        let sent = link.transmitted();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].payload, sent[1].payload);

        let stats = primary.stats();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.round_trips, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_error_is_retried() {
        let link = MockLink::new(MockLinkConfig {
            transmit_pattern: vec![ScriptedResult::Error, ScriptedResult::Success],
            ..MockLinkConfig::default()
        });
        let (mut primary, _rx) = primary_with(link.clone());

        let result = primary.transfer_once().await;
        assert!(matches!(result, Err(Error::TransmitError(_))));
        assert!(result.unwrap_err().is_retryable());

        link.push_receive(tunnel_response(TunnelTransfer::new(1, None)));
        primary.transfer_once().await.unwrap();

        assert_eq!(link.transmit_count(), 2);
        assert_eq!(primary.stats().transmit_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_response_keeps_request() {
        let link = MockLink::new(MockLinkConfig::default());
        let (mut primary, _rx) = primary_with(link.clone());

        link.push_receive(tunnel_response(TunnelTransfer::default()));
        assert!(matches!(
            primary.transfer_once().await,
            Err(Error::MalformedRequest(_))
        ));
        assert_eq!(primary.sequence(), &SequenceState::new());

        link.push_receive(tunnel_response(TunnelTransfer::new(1, None)));
        primary.transfer_once().await.unwrap();
        assert_eq!(primary.stats().malformed, 1);
    }

    #[test]
    fn test_stale_response_is_ignored() {
        let (mut primary, mut rx) = primary_with(MockLink::new(MockLinkConfig::default()));
        primary.radio.sequence = SequenceState::from_parts(5, Some(5));
        primary.tunnel().push_frame(vec![0xEE; 12]);
        primary.tunnel.lock().outbound.offer_chunk(8);

        // 이전 왕복의 응답이 늦게 도착
        let stale = TunnelTransfer::new(5, Some(4)).with_chunk(vec![1, 2], 0);
        primary.handle_tunnel_response(&stale).unwrap();

        assert_eq!(primary.sequence(), &SequenceState::from_parts(5, Some(5)));
        assert_eq!(primary.tunnel().lock().outbound.head_len(), Some(12));
        assert!(rx.try_recv().is_err());
        let stats = primary.stats();
        assert_eq!(stats.sequence_gaps, 1);
        assert_eq!(stats.missed_acks, 1);
    }

    #[test]
    fn test_inbound_frame_delivered_on_last_chunk() {
        let (mut primary, mut rx) = primary_with(MockLink::new(MockLinkConfig::default()));
        primary.radio.sequence = SequenceState::from_parts(3, Some(3));

        let first = TunnelTransfer::new(4, Some(3)).with_chunk(vec![1; 8], 2);
        primary.handle_tunnel_response(&first).unwrap();
        let last = TunnelTransfer::new(5, Some(4)).with_chunk(vec![2; 2], 0);
        primary.handle_tunnel_response(&last).unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.len(), 10);
        assert_eq!(&frame[8..], &[2, 2]);
        assert_eq!(primary.sequence(), &SequenceState::from_parts(5, Some(5)));
    }

    struct Pair {
        primary: tokio::task::JoinHandle<()>,
        secondary: tokio::task::JoinHandle<()>,
        primary_tunnel: TunnelHandle,
        secondary_tunnel: TunnelHandle,
        primary_rx: mpsc::UnboundedReceiver<Bytes>,
        secondary_rx: mpsc::UnboundedReceiver<Bytes>,
    }

    fn spawn_pair(primary_link: Box<dyn Link>, secondary_link: Box<dyn Link>) -> Pair {
        let config = Config {
            receive_timeout: Duration::from_millis(20),
            ..Config::default()
        };
        let (primary_tx, primary_rx) = mpsc::unbounded_channel();
        let (secondary_tx, secondary_rx) = mpsc::unbounded_channel();

        let mut primary = Primary::new(config.clone(), primary_link, Box::new(primary_tx)).unwrap();
        let mut secondary =
            Secondary::new(config, secondary_link, Box::new(secondary_tx)).unwrap();
        let primary_tunnel = primary.tunnel();
        let secondary_tunnel = secondary.tunnel();

        Pair {
            primary: tokio::spawn(async move { primary.run().await }),
            secondary: tokio::spawn(async move { secondary.run().await }),
            primary_tunnel,
            secondary_tunnel,
            primary_rx,
            secondary_rx,
        }
    }

    async fn exchange(mut pair: Pair) {
        let uplink: Vec<u8> = (0..100u8).collect();
        let downlink: Vec<u8> = (0..37u8).rev().collect();
        pair.primary_tunnel.push_frame(uplink.clone());
        pair.secondary_tunnel.push_frame(downlink.clone());

        let received = tokio::time::timeout(Duration::from_secs(60), async {
            let at_secondary = pair.secondary_rx.recv().await.unwrap();
            let at_primary = pair.primary_rx.recv().await.unwrap();
            (at_secondary, at_primary)
        })
        .await
        .expect("tunnel exchange timed out");

        pair.primary.abort();
        pair.secondary.abort();

        assert_eq!(received.0.as_ref(), &uplink[..]);
        assert_eq!(received.1.as_ref(), &downlink[..]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loopback_exchange() {
        let (primary_link, secondary_link) = LoopbackLink::pair(
            DEFAULT_MAX_PAYLOAD_SIZE,
            DEFAULT_PRIMARY_ADDRESS,
            DEFAULT_SECONDARY_ADDRESS,
        );
        exchange(spawn_pair(Box::new(primary_link), Box::new(secondary_link))).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lossy_exchange() {
        let (primary_link, secondary_link) = LoopbackLink::pair(
            DEFAULT_MAX_PAYLOAD_SIZE,
            DEFAULT_PRIMARY_ADDRESS,
            DEFAULT_SECONDARY_ADDRESS,
        );
        exchange(spawn_pair(
            Box::new(LossyLink::new(primary_link, 0.3, 7)),
            Box::new(LossyLink::new(secondary_link, 0.3, 11)),
        ))
        .await;
    }
}
