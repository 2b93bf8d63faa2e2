//! 프로토콜 메시지 정의
//!
//! 물리 프레임 하나에 `Request` 또는 `Response` 하나가 실림.
//! 라디오 프레임 예산(32 bytes)에 맞추기 위해 bincode varint 인코딩 사용

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// 청크를 실은 `NetworkTunnelTransfer` 의 최대 인코딩 오버헤드 (payload 제외)
///
/// variant(1) + id(1+5) + ack_id(1+5) + payload 태그/길이(1+1) + remaining_bytes(1+5)
pub const TRANSFER_OVERHEAD: usize = 21;

/// Ping 메시지 (요청/응답 공통)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// 왕복시킬 값 (선택)
    pub value: Option<u32>,
}

impl Ping {
    pub fn new(value: Option<u32>) -> Self {
        Self { value }
    }
}

/// 터널 전송 메시지
///
/// 필드 존재 여부가 의미를 가짐:
/// - `id`: 모든 전송 메시지에 필수
/// - `ack_id`: 한쪽이라도 ack를 관측한 이후에는 필수
/// - `payload`/`remaining_bytes`: 청크를 실을 때만
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelTransfer {
    pub id: Option<u32>,
    pub ack_id: Option<u32>,
    pub payload: Option<Vec<u8>>,
    pub remaining_bytes: Option<u32>,
}

impl TunnelTransfer {
    pub fn new(id: u32, ack_id: Option<u32>) -> Self {
        Self {
            id: Some(id),
            ack_id,
            payload: None,
            remaining_bytes: None,
        }
    }

    /// 청크 첨부
    pub fn with_chunk(mut self, payload: Vec<u8>, remaining_bytes: u32) -> Self {
        self.payload = Some(payload);
        self.remaining_bytes = Some(remaining_bytes);
        self
    }

    /// 현재 프레임에서 이 청크 뒤에 남은 바이트 수 (없으면 0)
    pub fn remaining(&self) -> u32 {
        self.remaining_bytes.unwrap_or(0)
    }
}

/// primary → secondary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Ping(Ping),
    NetworkTunnelTransfer(TunnelTransfer),
}

/// secondary → primary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Ping(Ping),
    NetworkTunnelTransfer(TunnelTransfer),
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Ping(_) => "ping",
            Request::NetworkTunnelTransfer(_) => "network_tunnel_transfer",
        }
    }
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Ping(_) => "ping",
            Response::NetworkTunnelTransfer(_) => "network_tunnel_transfer",
        }
    }
}

/// 와이어 인코딩 옵션
///
/// 고정 크기 라디오 프레임은 0으로 패딩되어 올 수 있으므로 trailing bytes 허용
fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_varint_encoding()
        .allow_trailing_bytes()
}

/// 메시지를 프레임 바이트로 직렬화
pub fn encode<M: Serialize>(message: &M) -> Result<Vec<u8>> {
    Ok(wire_options().serialize(message)?)
}

/// 프레임 바이트에서 메시지 역직렬화. 실패는 `MalformedRequest`
pub fn decode<M: DeserializeOwned>(bytes: &[u8]) -> Result<M> {
    wire_options()
        .deserialize(bytes)
        .map_err(|e| Error::MalformedRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_PAYLOAD_SIZE};

    #[test]
    fn test_worst_case_transfer_fits_radio_frame() {
        let transfer = TunnelTransfer::new(u32::MAX, Some(u32::MAX))
            .with_chunk(vec![0xFF; DEFAULT_CHUNK_SIZE], u32::MAX);
        let bytes = encode(&Request::NetworkTunnelTransfer(transfer)).unwrap();

        assert_eq!(bytes.len(), TRANSFER_OVERHEAD + DEFAULT_CHUNK_SIZE);
        assert!(bytes.len() <= DEFAULT_MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn test_zero_padded_frame_decodes() {
        let response = Response::Ping(Ping::new(Some(42)));
        let mut bytes = encode(&response).unwrap();
        bytes.resize(DEFAULT_MAX_PAYLOAD_SIZE, 0);

        let decoded: Response = decode(&bytes).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_field_presence_survives_encoding() {
        let request = Request::NetworkTunnelTransfer(TunnelTransfer::new(3, None));
        let decoded: Request = decode(&encode(&request).unwrap()).unwrap();

        match decoded {
            Request::NetworkTunnelTransfer(transfer) => {
                assert_eq!(transfer.id, Some(3));
                assert!(transfer.ack_id.is_none());
                assert!(transfer.payload.is_none());
                assert_eq!(transfer.remaining(), 0);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_malformed() {
        // 존재하지 않는 variant
        let result: Result<Request> = decode(&[0x07, 0x00]);
        assert!(matches!(result, Err(Error::MalformedRequest(_))));

        // 잘린 프레임
        let result: Result<Request> = decode(&[0x00]);
        assert!(matches!(result, Err(Error::MalformedRequest(_))));
    }
}
