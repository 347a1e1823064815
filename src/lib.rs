//! # DFTP (Datagram File Transfer Protocol)
//!
//! UDP 기반 블록 분할 파일 전송 + 수신측 주도 선택적 복구
//!
//! ## 핵심 특징
//! - **고정 크기 프레임**: 메타데이터 프레임(마커 0) + 1부터 번호가 붙는 데이터 프레임
//! - **ACK 없음**: 응답측은 프레임을 순서대로 쏘기만 하고 확인을 기다리지 않음
//! - **선택적 복구**: 수신측이 누락 블록을 찾아 `RECOVER`로 해당 블록만 다시 요청
//! - **무결성 검증**: 조립된 파일의 MD5를 메타데이터의 해시와 비교
//! - **타임아웃 + 재시도 예산**: 마지막 프레임이 사라져도 수신 루프가 멈추지 않음

pub mod config;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod reassembler;
pub mod requester;
pub mod server;
pub mod splitter;
pub mod stats;
pub mod store;
pub mod transfer;

pub use config::Config;
pub use error::{Error, FrameError, Result};
pub use frame::{ContentHash, DataFrame, Frame, MetadataFrame};
pub use protocol::{Command, Responder};
pub use reassembler::{BuildReport, Reassembler};
pub use requester::{Outcome, Requester};
pub use server::Server;
pub use splitter::BlockSplitter;
pub use stats::TransferStats;
pub use store::{ByteStore, DirStore, FileStat, MemoryStore};
pub use transfer::{SessionStore, TransferSession};

/// 기본 프레임 최대 크기 (바이트)
pub const BUFFER_SIZE: usize = 2048;

/// 데이터 프레임 헤더 크기: blockIndex(4)
pub const DATA_HEADER_SIZE: usize = 4;

/// 메타데이터 프레임 헤더 크기: marker(4) + fileSize(4) + hash(16) + totalBlocks(4)
pub const METADATA_HEADER_SIZE: usize = 28;

/// 콘텐츠 해시 길이 (MD5)
pub const HASH_LEN: usize = 16;

/// UDP 데이터그램 페이로드 최대 크기 (IPv4)
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// 기본 서버 포트
pub const DEFAULT_PORT: u16 = 8080;
