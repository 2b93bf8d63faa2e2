//! 물리 링크 추상화
//!
//! - 한 번에 하나의 물리 프레임 송수신
//! - 수신은 non-blocking (준비된 프레임이 없으면 `Ok(None)`)
//! - 빈 payload 프레임은 비콘

use bytes::Bytes;
use thiserror::Error;

/// 링크 계층 에러
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("프레임이 너무 큼: {size} bytes (최대 {max} bytes)")]
    TooLarge { size: usize, max: usize },

    #[error("송신 실패: {0}")]
    Transmit(String),

    #[error("수신 실패: {0}")]
    Receive(String),

    #[error("CRC 불일치: expected {expected:08X}, got {got:08X}")]
    CrcMismatch { expected: u32, got: u32 },

    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),
}

/// 물리 프레임
///
/// 송신 시에는 상대 채널 주소, 수신 시에는 이 프레임이 도착한 채널 주소
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub address: u32,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(address: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            address,
            payload: payload.into(),
        }
    }

    /// 내용 없는 비콘 프레임
    pub fn beacon(address: u32) -> Self {
        Self {
            address,
            payload: Bytes::new(),
        }
    }

    pub fn is_beacon(&self) -> bool {
        self.payload.is_empty()
    }
}

/// 물리 링크 (실제 링크 / 스크립트 mock 공통)
pub trait Link: Send {
    /// 프레임 하나 송신. payload 해석은 하지 않음
    fn transmit(&mut self, frame: &Frame) -> Result<(), LinkError>;

    /// 프레임 하나 수신 시도. 준비된 프레임이 없으면 `Ok(None)`
    fn receive(&mut self) -> Result<Option<Frame>, LinkError>;

    /// 한 프레임에 실을 수 있는 최대 payload 크기
    fn max_payload_size(&self) -> usize;

    /// 생존/채널 확인용 비콘 송신
    fn beacon(&mut self) -> Result<(), LinkError>;
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn transmit(&mut self, frame: &Frame) -> Result<(), LinkError> {
        (**self).transmit(frame)
    }

    fn receive(&mut self) -> Result<Option<Frame>, LinkError> {
        (**self).receive()
    }

    fn max_payload_size(&self) -> usize {
        (**self).max_payload_size()
    }

    fn beacon(&mut self) -> Result<(), LinkError> {
        (**self).beacon()
    }
}

/// payload 크기 검사 (각 링크 구현 공통)
pub fn check_payload_size(frame: &Frame, max: usize) -> Result<(), LinkError> {
    if frame.payload.len() > max {
        return Err(LinkError::TooLarge {
            size: frame.payload.len(),
            max,
        });
    }
    Ok(())
}
