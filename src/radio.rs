//! 라디오 인터페이스 (primary/secondary 공통 구성요소)
//!
//! - 링크 소유, 메시지 송수신과 실패 분류
//! - 시퀀스 번호 상태 (검증/전진)
//! - 비콘 스케줄링

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

use crate::config::Role;
use crate::link::{Frame, Link};
use crate::message;
use crate::stats::TunnelStats;
use crate::{Config, Error, Result};

/// 인터페이스 하나의 시퀀스 번호 상태
///
/// 수신 id 는 `last_ack_id + 1` (u32 wrapping) 일 때만 받아들임.
/// ack 를 한 번도 관측하지 않았으면 기준값은 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceState {
    next_id: u32,
    last_ack_id: Option<u32>,
}

impl SequenceState {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            last_ack_id: None,
        }
    }

    /// 임의 상태에서 시작 (테스트/복구용)
    pub fn from_parts(next_id: u32, last_ack_id: Option<u32>) -> Self {
        Self {
            next_id,
            last_ack_id,
        }
    }

    /// 다음 송신 전송에 붙일 id
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    /// 상대에게서 마지막으로 검증한 id
    pub fn last_ack_id(&self) -> Option<u32> {
        self.last_ack_id
    }

    pub fn has_observed_ack(&self) -> bool {
        self.last_ack_id.is_some()
    }

    /// 다음에 받아들일 id
    pub fn expected_id(&self) -> u32 {
        self.last_ack_id.unwrap_or(0).wrapping_add(1)
    }

    /// `id` 가 `last_ack_id` 바로 다음 값인지 검사. false 면 중복/순서 뒤바뀜/손실
    pub fn validate_id(&self, id: u32) -> bool {
        id == self.expected_id()
    }

    /// ack 확인된 왕복 한 번에 정확히 한 번 호출
    pub fn advance_id(&mut self) {
        self.last_ack_id = Some(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
    }

    /// 검증된 상대 id 기록 (primary 측)
    pub(crate) fn record_peer_id(&mut self, id: u32) {
        self.last_ack_id = Some(id);
    }

    /// 송신 전송이 ack 되어 다음 id 로 이동 (primary 측)
    pub(crate) fn advance_next_id(&mut self) {
        self.next_id = self.next_id.wrapping_add(1);
    }
}

impl Default for SequenceState {
    fn default() -> Self {
        Self::new()
    }
}

/// 공통 라디오 인터페이스
pub struct RadioInterface {
    config: Config,
    link: Box<dyn Link>,

    /// 이 쪽이 수신하는 채널 주소
    reading_address: u32,

    /// 이 쪽이 송신하는 채널 주소
    writing_address: u32,

    pub(crate) sequence: SequenceState,

    stats: Arc<RwLock<TunnelStats>>,

    next_beacon_at: Option<Instant>,
}

impl RadioInterface {
    /// 설정 검증 후 인터페이스 생성
    pub fn new(config: Config, role: Role, link: Box<dyn Link>) -> Result<Self> {
        config.validate(link.max_payload_size())?;
        let (reading_address, writing_address) = config.link_addresses(role);

        debug!(
            "라디오 인터페이스 생성: {:?}, read={:#010x}, write={:#010x}, max_payload={}",
            role,
            reading_address,
            writing_address,
            link.max_payload_size()
        );

        Ok(Self {
            config,
            link,
            reading_address,
            writing_address,
            sequence: SequenceState::new(),
            stats: Arc::new(RwLock::new(TunnelStats::new())),
            next_beacon_at: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sequence(&self) -> &SequenceState {
        &self.sequence
    }

    pub fn reading_address(&self) -> u32 {
        self.reading_address
    }

    pub fn writing_address(&self) -> u32 {
        self.writing_address
    }

    /// 메시지 인코딩 후 송신. 실패는 보고만 하고 재시도하지 않음
    pub fn send<M: Serialize>(&mut self, message: &M) -> Result<()> {
        let payload = message::encode(message)?;
        let max = self.link.max_payload_size();
        if payload.len() > max {
            return Err(Error::FrameTooLarge {
                size: payload.len(),
                max,
            });
        }

        let frame = Frame::new(self.writing_address, payload);
        self.link.transmit(&frame).map_err(Error::TransmitError)
    }

    /// `timeout` 까지 링크를 폴링해 메시지 하나 수신
    ///
    /// 비콘 프레임은 세고 건너뜀. 폴링 중에도 비콘 주기를 지킴
    pub async fn receive<M: DeserializeOwned>(&mut self, timeout: Duration) -> Result<M> {
        let deadline = Instant::now() + timeout;

        loop {
            self.maybe_beacon();

            match self.link.receive() {
                Ok(Some(frame)) if frame.is_beacon() => {
                    trace!("비콘 수신: {:#010x}", frame.address);
                    self.stats.write().beacons_received += 1;
                }
                Ok(Some(frame)) => return message::decode(&frame.payload),
                Ok(None) => {}
                Err(e) => return Err(Error::ReceiveError(e)),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout(timeout));
            }
            sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    /// 비콘 주기가 되었으면 비콘 송신. 실패는 기록만 함
    pub fn maybe_beacon(&mut self) {
        let Some(interval) = self.config.beacon_interval else {
            return;
        };

        let now = Instant::now();
        if matches!(self.next_beacon_at, Some(at) if now < at) {
            return;
        }

        match self.link.beacon() {
            Ok(()) => self.stats.write().beacons_sent += 1,
            Err(e) => {
                warn!("비콘 송신 실패: {}", e);
                self.stats.write().beacon_failures += 1;
            }
        }

        // 고정 주기 유지, 밀렸으면 지금부터 다시
        self.next_beacon_at = Some(match self.next_beacon_at {
            Some(at) if at + interval > now => at + interval,
            _ => now + interval,
        });
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> TunnelStats {
        self.stats.read().clone()
    }

    /// 다른 태스크에서 통계를 읽기 위한 핸들
    pub fn stats_handle(&self) -> Arc<RwLock<TunnelStats>> {
        self.stats.clone()
    }

    pub(crate) fn record(&self, update: impl FnOnce(&mut TunnelStats)) {
        update(&mut self.stats.write());
    }
}
