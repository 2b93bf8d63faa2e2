//! 청크 분할과 프레임 재조립
//!
//! - 송신: 완성된 네트워크 프레임 FIFO, 헤드 프레임 앞에서 청크 하나씩 소비
//! - 수신: 청크를 모았다가 `remaining_bytes == 0` 이면 프레임 하나 완성
//!
//! 두 버퍼 모두 프로토콜 태스크와 디바이스 리더 태스크가 공유하므로
//! `TunnelHandle` 의 mutex 하나로 보호됨

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::Config;

/// 수신 청크 재조립기
#[derive(Debug)]
pub struct Reassembler {
    buffer: BytesMut,
    max_frame_size: usize,

    /// 크기 초과로 현재 프레임을 버리는 중
    discarding: bool,
}

impl Reassembler {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_size,
            discarding: false,
        }
    }

    /// 청크 추가. 프레임 경계(`remaining == 0`)에 도달하면 완성 프레임을 반환하고 버퍼를 비움
    pub fn push_chunk(&mut self, chunk: &[u8], remaining: u32) -> Option<Bytes> {
        if !self.discarding && self.buffer.len() + chunk.len() > self.max_frame_size {
            error!(
                "재조립 버퍼 초과: {} bytes (최대 {}), 프레임 폐기",
                self.buffer.len() + chunk.len(),
                self.max_frame_size
            );
            self.buffer.clear();
            self.discarding = true;
        }

        if !self.discarding {
            self.buffer.extend_from_slice(chunk);
        }

        if remaining != 0 {
            return None;
        }

        if self.discarding {
            self.discarding = false;
            return None;
        }

        if self.buffer.is_empty() {
            return None;
        }

        Some(self.buffer.split().freeze())
    }

    /// 현재까지 모인 바이트 수
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// 송신 대기 프레임 큐
#[derive(Debug)]
pub struct OutboundQueue {
    frames: VecDeque<Bytes>,
    max_pending_frames: usize,

    /// 상대 재조립기가 받아들일 수 있는 최대 프레임 크기
    max_frame_size: usize,

    /// 응답(ack)을 기다리는 청크 길이
    in_flight: Option<usize>,

    /// 큐가 가득 차서 버린 프레임 수
    dropped_frames: u64,
}

impl OutboundQueue {
    pub fn new(max_pending_frames: usize, max_frame_size: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            max_pending_frames,
            max_frame_size,
            in_flight: None,
            dropped_frames: 0,
        }
    }

    /// 프레임 추가. 빈 프레임, 최대 크기 초과, 큐가 가득 찬 경우 false
    pub fn push(&mut self, frame: Bytes) -> bool {
        if frame.is_empty() {
            return false;
        }

        if frame.len() > self.max_frame_size {
            self.dropped_frames += 1;
            warn!(
                "프레임 크기 초과 ({} bytes, 최대 {}), 드롭",
                frame.len(),
                self.max_frame_size
            );
            return false;
        }

        if self.frames.len() >= self.max_pending_frames {
            self.dropped_frames += 1;
            warn!(
                "송신 큐 가득 참 ({} frames), {} bytes 프레임 드롭",
                self.frames.len(),
                frame.len()
            );
            return false;
        }

        self.frames.push_back(frame);
        true
    }

    /// 헤드 프레임 앞부분 최대 `chunk_size` 바이트와 그 뒤 남는 바이트 수.
    /// 청크를 꺼내면 in-flight 로 표시됨 (큐는 ack 전까지 그대로)
    pub fn offer_chunk(&mut self, chunk_size: usize) -> Option<(Bytes, u32)> {
        let head = self.frames.front()?;
        let transfer_size = head.len().min(chunk_size);
        let chunk = head.slice(..transfer_size);
        let remaining = (head.len() - transfer_size) as u32;

        self.in_flight = Some(transfer_size);
        Some((chunk, remaining))
    }

    /// in-flight 청크 확정: 헤드 프레임 앞에서 제거하고, 다 비면 헤드 프레임 제거.
    /// 소비한 바이트 수 반환
    pub fn acknowledge(&mut self) -> Option<usize> {
        let transfer_size = self.in_flight.take()?;
        let head = self.frames.front_mut()?;

        let consumed = transfer_size.min(head.len());
        head.advance(consumed);
        if head.is_empty() {
            self.frames.pop_front();
            debug!("프레임 송신 완료, 남은 프레임 {}", self.frames.len());
        }

        Some(consumed)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// 대기 중인 프레임 수
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// 헤드 프레임의 남은 바이트 수
    pub fn head_len(&self) -> Option<usize> {
        self.frames.front().map(|frame| frame.len())
    }

    /// 대기 중인 총 바이트 수
    pub fn pending_bytes(&self) -> usize {
        self.frames.iter().map(|frame| frame.len()).sum()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }
}

/// 재조립 버퍼 + 송신 큐
#[derive(Debug)]
pub struct TunnelState {
    pub reassembly: Reassembler,
    pub outbound: OutboundQueue,
}

impl TunnelState {
    pub fn new(config: &Config) -> Self {
        Self {
            reassembly: Reassembler::new(config.max_frame_size),
            outbound: OutboundQueue::new(config.max_pending_frames, config.max_frame_size),
        }
    }
}

/// 공유 터널 상태 핸들
///
/// 디바이스 리더 태스크는 `push_frame` 만 사용. 잠금은 상태 전이 한 번 동안만 유지하고
/// 링크 호출 중에는 절대 잡지 않음
#[derive(Debug, Clone)]
pub struct TunnelHandle {
    inner: Arc<Mutex<TunnelState>>,
}

impl TunnelHandle {
    pub fn new(config: &Config) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TunnelState::new(config))),
        }
    }

    /// 디바이스에서 읽은 완성 프레임을 송신 큐에 추가
    pub fn push_frame(&self, frame: impl Into<Bytes>) -> bool {
        self.inner.lock().outbound.push(frame.into())
    }

    /// 송신 대기 프레임 수
    pub fn pending_frames(&self) -> usize {
        self.inner.lock().outbound.len()
    }

    /// 재조립 중인 바이트 수
    pub fn reassembly_len(&self) -> usize {
        self.inner.lock().reassembly.len()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TunnelState> {
        self.inner.lock()
    }
}
