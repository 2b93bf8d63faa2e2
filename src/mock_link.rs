//! 테스트/시뮬레이션용 링크
//!
//! - `MockLink`: 스크립트된 수신 결과 재생, 송신/비콘 결과 패턴, 비콘 타이밍 기록
//! - `LoopbackLink`: 메모리 안에서 연결된 링크 한 쌍
//! - `LossyLink`: 송신 프레임을 확률적으로 버리는 래퍼

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use tracing::trace;

use crate::link::{check_payload_size, Frame, Link, LinkError};
use crate::DEFAULT_MAX_PAYLOAD_SIZE;

/// 스크립트된 수신 결과
#[derive(Debug, Clone)]
pub enum ScriptedReceive {
    Frame(Frame),
    NotReady,
    Error,
}

/// 스크립트된 송신/비콘 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedResult {
    Success,
    Error,
}

/// MockLink 설정
#[derive(Debug, Clone)]
pub struct MockLinkConfig {
    pub max_payload_size: usize,

    /// 기대하는 비콘 주기 (타이밍 검사 기준)
    pub beacon_interval: Duration,

    /// 비콘 결과 (순환). 비어 있으면 항상 성공
    pub beacon_result_pattern: Vec<ScriptedResult>,

    /// 순서대로 재생되는 수신 결과. 소진되면 NotReady
    pub receive_script: Vec<ScriptedReceive>,

    /// 송신 결과 (순환). 비어 있으면 항상 성공
    pub transmit_pattern: Vec<ScriptedResult>,
}

impl Default for MockLinkConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            beacon_interval: Duration::from_millis(200),
            beacon_result_pattern: Vec::new(),
            receive_script: Vec::new(),
            transmit_pattern: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    receive_script: VecDeque<ScriptedReceive>,
    transmit_count: usize,
    transmitted: Vec<Frame>,
    beacon_times: Vec<Duration>,
}

/// 스크립트 기반 mock 링크
///
/// clone은 같은 상태를 공유하므로 테스트에서 핸들을 남겨 두고 검사할 수 있음
#[derive(Debug, Clone)]
pub struct MockLink {
    config: Arc<MockLinkConfig>,
    start: Instant,
    state: Arc<Mutex<MockState>>,
}

impl MockLink {
    pub fn new(config: MockLinkConfig) -> Self {
        let state = MockState {
            receive_script: config.receive_script.iter().cloned().collect(),
            ..MockState::default()
        };

        Self {
            config: Arc::new(config),
            start: Instant::now(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// 수신 스크립트 끝에 프레임 추가
    pub fn push_receive(&self, frame: Frame) {
        self.state
            .lock()
            .receive_script
            .push_back(ScriptedReceive::Frame(frame));
    }

    /// 지금까지 송신된 프레임
    pub fn transmitted(&self) -> Vec<Frame> {
        self.state.lock().transmitted.clone()
    }

    /// 송신 시도 횟수 (실패 포함)
    pub fn transmit_count(&self) -> usize {
        self.state.lock().transmit_count
    }

    pub fn beacon_count(&self) -> usize {
        self.state.lock().beacon_times.len()
    }

    /// 기대 시각(`index * beacon_interval`)에서 `tolerance` 이상 벗어난 비콘 목록
    pub fn beacon_timing_errors(&self, tolerance: Duration) -> Vec<(usize, Duration)> {
        let interval = self.config.beacon_interval;
        self.state
            .lock()
            .beacon_times
            .iter()
            .enumerate()
            .filter(|(index, &at)| {
                let expected = interval * *index as u32;
                at < expected || at >= expected + tolerance
            })
            .map(|(index, &at)| (index, at))
            .collect()
    }

    fn pattern_result(pattern: &[ScriptedResult], count: usize) -> ScriptedResult {
        if pattern.is_empty() {
            return ScriptedResult::Success;
        }
        pattern[count % pattern.len()]
    }
}

impl Link for MockLink {
    fn transmit(&mut self, frame: &Frame) -> Result<(), LinkError> {
        check_payload_size(frame, self.config.max_payload_size)?;

        let mut state = self.state.lock();
        let result = Self::pattern_result(&self.config.transmit_pattern, state.transmit_count);
        state.transmit_count += 1;

        match result {
            ScriptedResult::Success => {
                state.transmitted.push(frame.clone());
                Ok(())
            }
            ScriptedResult::Error => Err(LinkError::Transmit("scripted transmit error".into())),
        }
    }

    fn receive(&mut self) -> Result<Option<Frame>, LinkError> {
        match self.state.lock().receive_script.pop_front() {
            Some(ScriptedReceive::Frame(frame)) => Ok(Some(frame)),
            Some(ScriptedReceive::NotReady) | None => Ok(None),
            Some(ScriptedReceive::Error) => Err(LinkError::Receive("scripted receive error".into())),
        }
    }

    fn max_payload_size(&self) -> usize {
        self.config.max_payload_size
    }

    fn beacon(&mut self) -> Result<(), LinkError> {
        let elapsed = self.start.elapsed();
        let mut state = self.state.lock();
        let index = state.beacon_times.len();
        state.beacon_times.push(elapsed);

        match Self::pattern_result(&self.config.beacon_result_pattern, index) {
            ScriptedResult::Success => Ok(()),
            ScriptedResult::Error => Err(LinkError::Transmit("scripted beacon error".into())),
        }
    }
}

/// 메모리 큐로 연결된 링크 한쪽 끝
#[derive(Debug)]
pub struct LoopbackLink {
    max_payload_size: usize,
    address: u32,
    outgoing: Arc<Mutex<VecDeque<Frame>>>,
    incoming: Arc<Mutex<VecDeque<Frame>>>,
}

impl LoopbackLink {
    /// 서로 연결된 링크 한 쌍 생성. 각 끝은 자신의 송신 채널 주소를 가짐
    pub fn pair(max_payload_size: usize, a_address: u32, b_address: u32) -> (Self, Self) {
        let a_to_b = Arc::new(Mutex::new(VecDeque::new()));
        let b_to_a = Arc::new(Mutex::new(VecDeque::new()));

        let a = Self {
            max_payload_size,
            address: a_address,
            outgoing: a_to_b.clone(),
            incoming: b_to_a.clone(),
        };
        let b = Self {
            max_payload_size,
            address: b_address,
            outgoing: b_to_a,
            incoming: a_to_b,
        };
        (a, b)
    }
}

impl Link for LoopbackLink {
    fn transmit(&mut self, frame: &Frame) -> Result<(), LinkError> {
        check_payload_size(frame, self.max_payload_size)?;
        self.outgoing.lock().push_back(frame.clone());
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<Frame>, LinkError> {
        Ok(self.incoming.lock().pop_front())
    }

    fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    fn beacon(&mut self) -> Result<(), LinkError> {
        self.outgoing.lock().push_back(Frame::beacon(self.address));
        Ok(())
    }
}

/// 송신 프레임 일부를 버리는 링크 래퍼
///
/// auto-ack 없는 라디오처럼 버려진 프레임도 송신 성공으로 보고함
#[derive(Debug)]
pub struct LossyLink<L> {
    inner: L,
    loss_rate: f64,
    rng: StdRng,
    dropped: u64,
}

impl<L: Link> LossyLink<L> {
    /// `loss_rate`: 0.0 ~ 1.0, `seed`: 재현 가능한 손실 패턴용
    pub fn new(inner: L, loss_rate: f64, seed: u64) -> Self {
        Self {
            inner,
            loss_rate: loss_rate.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(seed),
            dropped: 0,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl<L: Link> Link for LossyLink<L> {
    fn transmit(&mut self, frame: &Frame) -> Result<(), LinkError> {
        check_payload_size(frame, self.inner.max_payload_size())?;
        if self.rng.gen_bool(self.loss_rate) {
            self.dropped += 1;
            trace!("프레임 드롭 ({} bytes)", frame.payload.len());
            return Ok(());
        }
        self.inner.transmit(frame)
    }

    fn receive(&mut self) -> Result<Option<Frame>, LinkError> {
        self.inner.receive()
    }

    fn max_payload_size(&self) -> usize {
        self.inner.max_payload_size()
    }

    fn beacon(&mut self) -> Result<(), LinkError> {
        self.inner.beacon()
    }
}
