//! 터널 통계

use std::time::Duration;

use tokio::time::Instant;

/// 인터페이스 하나의 누적 통계
#[derive(Debug, Clone)]
pub struct TunnelStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 완료된 왕복 수
    pub round_trips: u64,

    /// 재전송(재시도) 수
    pub retries: u64,

    /// 응답 타임아웃 수
    pub timeouts: u64,

    /// 디코딩 실패/필드 누락 메시지 수
    pub malformed: u64,

    /// 송신 실패 수
    pub transmit_errors: u64,

    /// 링크 수신 실패 수
    pub receive_errors: u64,

    /// 비연속 id 수신 수
    pub sequence_gaps: u64,

    /// 상대가 ack 하지 않은 왕복 수
    pub missed_acks: u64,

    /// 송신 확정된 청크 수
    pub chunks_sent: u64,

    /// 수신(재조립)된 청크 수
    pub chunks_received: u64,

    /// 디바이스로 전달된 프레임 수
    pub frames_delivered: u64,

    /// 디바이스로 전달된 바이트 수
    pub bytes_delivered: u64,

    /// 디바이스 쓰기 실패 수
    pub device_errors: u64,

    pub beacons_sent: u64,
    pub beacon_failures: u64,
    pub beacons_received: u64,
}

impl TunnelStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            round_trips: 0,
            retries: 0,
            timeouts: 0,
            malformed: 0,
            transmit_errors: 0,
            receive_errors: 0,
            sequence_gaps: 0,
            missed_acks: 0,
            chunks_sent: 0,
            chunks_received: 0,
            frames_delivered: 0,
            bytes_delivered: 0,
            device_errors: 0,
            beacons_sent: 0,
            beacon_failures: 0,
            beacons_received: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 재시도 비율 (재시도 / 전체 시도)
    pub fn retry_ratio(&self) -> f64 {
        let attempts = self.round_trips + self.retries;
        if attempts == 0 {
            return 0.0;
        }
        self.retries as f64 / attempts as f64
    }

    /// 디바이스 전달 처리율 (bytes/sec)
    pub fn delivered_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_delivered as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Round trips: {} | Retries: {} ({:.1}%) | Gaps: {} | Chunks tx/rx: {}/{} | Frames: {} ({} bytes, {:.1} B/s)",
            self.elapsed().as_secs_f64(),
            self.round_trips,
            self.retries,
            self.retry_ratio() * 100.0,
            self.sequence_gaps,
            self.chunks_sent,
            self.chunks_received,
            self.frames_delivered,
            self.bytes_delivered,
            self.delivered_throughput(),
        )
    }
}

impl Default for TunnelStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_ratio() {
        let mut stats = TunnelStats::new();
        assert_eq!(stats.retry_ratio(), 0.0);

        stats.round_trips = 3;
        stats.retries = 1;
        assert!((stats.retry_ratio() - 0.25).abs() < f64::EPSILON);
        assert!(stats.summary().contains("Retries: 1"));
    }
}
