//! # nerfnet
//!
//! 작은 프레임(32 bytes)의 반이중 라디오 링크 위에서 IP 프레임을 터널링하는
//! 요청/응답 기반 신뢰 전송
//!
//! ## 핵심 특징
//! - **Primary/Secondary**: primary 만 요청을 보내고 secondary 는 요청마다 정확히 한 번 응답
//! - **양방향 청크 전송**: 요청/응답 양쪽에 청크 하나씩 실어 왕복 한 번에 양방향 전송
//! - **시퀀스 번호**: id/ack_id 로 손실, 중복, 순서 뒤바뀜 감지
//! - **재전송**: 타임아웃이나 전송 실패 시 같은 요청을 그대로 재전송
//! - **비콘**: 링크 생존 확인용 주기적 빈 프레임

pub mod chunk;
pub mod config;
pub mod device;
pub mod error;
pub mod link;
pub mod message;
pub mod mock_link;
pub mod primary;
pub mod radio;
pub mod secondary;
pub mod stats;
pub mod udp_link;

pub use chunk::{OutboundQueue, Reassembler, TunnelHandle};
pub use config::{Config, Role};
pub use device::{FrameSink, UdpDevice};
pub use error::{Error, Result};
pub use link::{Frame, Link, LinkError};
pub use message::{Ping, Request, Response, TunnelTransfer};
pub use primary::Primary;
pub use radio::{RadioInterface, SequenceState};
pub use secondary::Secondary;
pub use stats::TunnelStats;
pub use udp_link::UdpLink;

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 8;

/// 라디오 프레임 최대 payload (NRF24L01)
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 32;

/// primary → secondary 채널 기본 주소
pub const DEFAULT_PRIMARY_ADDRESS: u32 = 0x9001_9001;

/// secondary → primary 채널 기본 주소
pub const DEFAULT_SECONDARY_ADDRESS: u32 = 0x9000_9000;
