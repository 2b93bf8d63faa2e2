//! 터널 설정

use std::time::Duration;

use crate::message::TRANSFER_OVERHEAD;
use crate::{
    Error, Result, DEFAULT_CHUNK_SIZE, DEFAULT_PRIMARY_ADDRESS, DEFAULT_SECONDARY_ADDRESS,
};

/// 링크 위에서의 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// 요청을 능동적으로 보내는 쪽
    Primary,

    /// 요청을 기다렸다가 응답하는 쪽
    Secondary,
}

/// nerfnet 터널 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// primary → secondary 채널 주소
    pub primary_address: u32,

    /// secondary → primary 채널 주소
    pub secondary_address: u32,

    /// 청크 크기 (바이트). 링크 최대 payload 에서 메시지 오버헤드를 뺀 값 이하
    pub chunk_size: usize,

    /// 왕복(및 재시도) 사이 지연
    pub rf_delay: Duration,

    /// primary 가 응답을 기다리는 데드라인
    pub receive_timeout: Duration,

    /// secondary 가 요청 하나를 기다리는 데드라인 (초과 시 다시 대기)
    pub listen_timeout: Duration,

    /// 링크 폴링 간격
    pub poll_interval: Duration,

    /// 비콘 주기. None 이면 비콘 송신 안 함
    pub beacon_interval: Option<Duration>,

    /// 송신 대기 프레임 최대 수
    pub max_pending_frames: usize,

    /// 재조립 가능한 최대 프레임 크기 (바이트)
    pub max_frame_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            primary_address: DEFAULT_PRIMARY_ADDRESS,
            secondary_address: DEFAULT_SECONDARY_ADDRESS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            rf_delay: Duration::from_millis(5),
            receive_timeout: Duration::from_millis(50),
            listen_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(1),
            beacon_interval: None,
            max_pending_frames: 64,
            max_frame_size: 65535,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 주소만 지정한 기본 설정
    pub fn with_addresses(primary_address: u32, secondary_address: u32) -> Self {
        Self {
            primary_address,
            secondary_address,
            ..Self::default()
        }
    }

    /// 역할별 (읽기 주소, 쓰기 주소)
    pub fn link_addresses(&self, role: Role) -> (u32, u32) {
        match role {
            Role::Primary => (self.secondary_address, self.primary_address),
            Role::Secondary => (self.primary_address, self.secondary_address),
        }
    }

    /// 프레임 하나를 보내는 데 필요한 왕복 수
    pub fn round_trips_for(&self, frame_len: usize) -> usize {
        (frame_len + self.chunk_size - 1) / self.chunk_size
    }

    /// 링크 최대 payload 기준 설정 검증
    pub fn validate(&self, max_payload_size: usize) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size 는 0 일 수 없음".into()));
        }

        if self.chunk_size + TRANSFER_OVERHEAD > max_payload_size {
            return Err(Error::InvalidConfig(format!(
                "chunk_size {} + 오버헤드 {} > 링크 최대 payload {}",
                self.chunk_size, TRANSFER_OVERHEAD, max_payload_size
            )));
        }

        if self.primary_address == self.secondary_address {
            return Err(Error::InvalidConfig(
                "primary/secondary 주소가 같음".into(),
            ));
        }

        if self.max_pending_frames == 0 {
            return Err(Error::InvalidConfig("max_pending_frames 는 0 일 수 없음".into()));
        }

        Ok(())
    }

    /// 저지연 설정 (짧은 데드라인, 잦은 폴링)
    pub fn low_latency() -> Self {
        Self {
            rf_delay: Duration::from_micros(500),
            receive_timeout: Duration::from_millis(10),
            listen_timeout: Duration::from_millis(250),
            poll_interval: Duration::from_micros(200),
            ..Self::default()
        }
    }

    /// 손실이 많은 링크용 설정
    pub fn lossy_link() -> Self {
        Self {
            rf_delay: Duration::from_millis(10),
            receive_timeout: Duration::from_millis(150),
            listen_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(2),
            beacon_interval: Some(Duration::from_millis(200)),
            max_pending_frames: 16,
            ..Self::default()
        }
    }
}
