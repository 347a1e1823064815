//! 에러 타입 정의

use thiserror::Error;

/// 프레임 디코딩/검증 에러 (수신측 로컬, 해당 프레임만 버림)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("프레임이 너무 짧음: 최소 {min} bytes, got {got}")]
    TooShort { min: usize, got: usize },

    #[error("프레임이 너무 큼: 최대 {max} bytes, got {got}")]
    TooLarge { max: usize, got: usize },

    #[error("유효하지 않은 파일 이름: {0}")]
    InvalidName(String),

    #[error("블록 수 불일치: file_size={file_size} 이면 {expected} 블록이어야 함, got {got}")]
    BlockCountMismatch {
        file_size: u32,
        expected: u32,
        got: u32,
    },

    #[error("범위 밖 블록: index={index}, total_blocks={total}")]
    BlockOutOfRange { index: u32, total: u32 },

    #[error("블록 길이 불일치: index={index}, expected {expected} bytes, got {got}")]
    BlockLength {
        index: u32,
        expected: usize,
        got: usize,
    },
}

/// DFTP 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("명령 에러: {0}")]
    Command(String),

    #[error("파일 에러: {name}: {reason}")]
    File { name: String, reason: String },

    #[error("프레임 에러: {0}")]
    Frame(#[from] FrameError),

    #[error("무결성 검증 실패: {name}: expected {expected}, got {actual}")]
    Integrity {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("수신 타임아웃: {name}, 대기 중인 블록 {outstanding}개")]
    Timeout { name: String, outstanding: usize },

    #[error("메타데이터 없음: {0}")]
    MissingMetadata(String),

    #[error("세션 없음: {0}")]
    UnknownSession(String),

    #[error("채널 닫힘")]
    ChannelClosed,
}

impl Error {
    pub(crate) fn command(msg: impl Into<String>) -> Self {
        Error::Command(msg.into())
    }

    pub(crate) fn file(name: &str, reason: impl ToString) -> Self {
        Error::File {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
