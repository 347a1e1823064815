//! 프로토콜 설정

use std::time::Duration;

use crate::{BUFFER_SIZE, DATA_HEADER_SIZE, MAX_DATAGRAM_SIZE, METADATA_HEADER_SIZE};

/// DFTP 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 프레임 최대 크기 (바이트)
    /// 데이터 페이로드와 메타데이터 파일 이름 길이를 모두 제한
    pub buffer_size: usize,

    /// 다음 프레임을 기다리는 최대 시간 (밀리초)
    pub recv_timeout_ms: u64,

    /// 타임아웃 후 누락 블록 재요청 횟수
    pub max_retries: u32,

    /// 프레임 전송 간격 (마이크로초)
    /// 0이면 소켓 백프레셔에만 의존
    pub frame_interval_us: u64,

    /// 응답측에서 데이터 프레임을 일부러 버리는 비율 (0.0 ~ 1.0)
    /// 복구 경로 테스트용
    pub drop_ratio: f64,

    /// 수신 큐 크기 (프레임 수)
    pub recv_queue_size: usize,

    /// 송신 큐 크기 (응답 배치 수)
    pub send_queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: BUFFER_SIZE,
            recv_timeout_ms: 2000,  // 2초
            max_retries: 3,
            frame_interval_us: 0,   // 최대 속도
            drop_ratio: 0.0,
            recv_queue_size: 4096,
            send_queue_size: 64,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 데이터 프레임 하나에 실을 수 있는 페이로드 크기
    pub fn payload_capacity(&self) -> usize {
        self.buffer_size - DATA_HEADER_SIZE
    }

    /// 메타데이터 프레임에 실을 수 있는 파일 이름 최대 길이
    pub fn max_name_len(&self) -> usize {
        self.buffer_size - METADATA_HEADER_SIZE
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(self.frame_interval_us)
    }

    /// 같은 호스트 안에서의 전송용 설정
    pub fn local() -> Self {
        Self {
            recv_timeout_ms: 500,
            max_retries: 2,
            ..Self::default()
        }
    }

    /// 손실이 잦은 링크용 설정
    pub fn lossy_link() -> Self {
        Self {
            recv_timeout_ms: 3000,
            max_retries: 8,
            frame_interval_us: 50,  // 약간의 간격
            recv_queue_size: 16384,
            ..Self::default()
        }
    }

    /// 설정 검증
    pub fn validate(&self) -> crate::Result<()> {
        if self.buffer_size <= METADATA_HEADER_SIZE {
            return Err(crate::Error::command(format!(
                "buffer_size는 {}보다 커야 함: {}",
                METADATA_HEADER_SIZE, self.buffer_size
            )));
        }
        if self.buffer_size > MAX_DATAGRAM_SIZE {
            return Err(crate::Error::command(format!(
                "buffer_size는 {} 이하여야 함: {}",
                MAX_DATAGRAM_SIZE, self.buffer_size
            )));
        }
        if self.recv_queue_size == 0 || self.send_queue_size == 0 {
            return Err(crate::Error::command(format!(
                "큐 크기는 0보다 커야 함: recv={}, send={}",
                self.recv_queue_size, self.send_queue_size
            )));
        }
        if !(0.0..=1.0).contains(&self.drop_ratio) {
            return Err(crate::Error::command(format!(
                "drop_ratio는 0.0 ~ 1.0 범위여야 함: {}",
                self.drop_ratio
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_payload_capacity() {
        let config = Config::default();
        assert_eq!(config.payload_capacity(), 2044);
        assert_eq!(config.max_name_len(), 2020);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_tiny_buffer() {
        let config = Config {
            buffer_size: 16,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_buffer() {
        let config = Config {
            buffer_size: 70000,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            buffer_size: MAX_DATAGRAM_SIZE,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_queues() {
        for (recv, send) in [(0, 64), (4096, 0)] {
            let config = Config {
                recv_queue_size: recv,
                send_queue_size: send,
                ..Config::default()
            };
            assert!(config.validate().is_err(), "recv={} send={}", recv, send);
        }
    }

    #[test]
    fn test_presets_are_valid() {
        for config in [Config::local(), Config::lossy_link()] {
            assert!(config.validate().is_ok());
        }
        assert!(Config::lossy_link().max_retries > Config::local().max_retries);
    }
}
