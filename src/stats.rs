//! 전송 통계

use std::time::{Duration, Instant};

/// 전송 통계 (요청측/응답측 공용)
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 처리한 명령 수
    pub commands: u64,

    /// 송신 프레임 수
    pub frames_sent: u64,

    /// 송신 바이트
    pub bytes_sent: u64,

    /// 손실 시뮬레이션으로 버린 프레임 수
    pub frames_dropped: u64,

    /// 수신 프레임 수 (디코딩 성공)
    pub frames_received: u64,

    /// 수신 페이로드 바이트
    pub bytes_received: u64,

    /// 이미 가지고 있던 블록을 다시 받은 수
    pub duplicate_blocks: u64,

    /// 디코딩/검증 실패로 버린 프레임 수
    pub rejected_frames: u64,

    /// 복구 라운드 수 (RECOVER)
    pub recovery_rounds: u64,

    /// 타임아웃 후 재요청 횟수
    pub retries: u64,

    /// 응답측 파일 에러 수
    pub file_errors: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            commands: 0,
            frames_sent: 0,
            bytes_sent: 0,
            frames_dropped: 0,
            frames_received: 0,
            bytes_received: 0,
            duplicate_blocks: 0,
            rejected_frames: 0,
            recovery_rounds: 0,
            retries: 0,
            file_errors: 0,
        }
    }

    pub fn record_sent(&mut self, len: usize) {
        self.frames_sent += 1;
        self.bytes_sent += len as u64;
    }

    pub fn record_received(&mut self, len: usize) {
        self.frames_received += 1;
        self.bytes_received += len as u64;
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 수신 처리율 (bytes/sec)
    pub fn receive_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_received as f64 / elapsed
    }

    /// 중복 수신 비율
    pub fn duplicate_ratio(&self) -> f64 {
        if self.frames_received == 0 {
            return 0.0;
        }
        self.duplicate_blocks as f64 / self.frames_received as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Commands: {} | Sent: {} frames ({} bytes, {} dropped) | \
             Received: {} frames ({} bytes, {:.0} B/s, {:.1}% dup, {} rejected) | \
             Recover rounds: {} | Retries: {}",
            self.elapsed().as_secs_f64(),
            self.commands,
            self.frames_sent,
            self.bytes_sent,
            self.frames_dropped,
            self.frames_received,
            self.bytes_received,
            self.receive_throughput(),
            self.duplicate_ratio() * 100.0,
            self.rejected_frames,
            self.recovery_rounds,
            self.retries,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}
