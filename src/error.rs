//! 에러 타입 정의

use std::time::Duration;

use thiserror::Error;

use crate::link::LinkError;

/// nerfnet 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    /// 데드라인 안에 응답이 오지 않음 (primary가 재전송으로 복구)
    #[error("응답 타임아웃: {0:?}")]
    Timeout(Duration),

    /// 디코딩 불가 또는 필수 필드 누락
    #[error("잘못된 메시지: {0}")]
    MalformedRequest(String),

    /// 물리 계층 전송 실패 (이 계층에서는 재시도하지 않음)
    #[error("전송 에러: {0}")]
    TransmitError(#[source] LinkError),

    #[error("수신 에러: {0}")]
    ReceiveError(#[source] LinkError),

    #[error("프레임 크기 초과: {size} bytes (최대 {max} bytes)")]
    FrameTooLarge { size: usize, max: usize },

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// 재시도로 복구 가능한 에러인지 여부
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::MalformedRequest(_) | Error::TransmitError(_) | Error::ReceiveError(_)
        )
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
