//! 프레임 코덱
//!
//! 모든 정수는 big-endian 고정 폭
//!
//! ```text
//! 메타데이터: [u32 marker=0][u32 file_size][16B md5][u32 total_blocks][file_name ...]
//! 데이터:     [u32 block_index (1..)][payload ...]
//! 에러:       [u32 marker=0xFFFFFFFF][utf-8 reason ...]
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::{DATA_HEADER_SIZE, HASH_LEN, METADATA_HEADER_SIZE};

/// 블록 번호 (1부터 시작, 0은 메타데이터 전용)
pub type BlockIndex = u32;

/// 메타데이터 프레임 마커
pub const METADATA_MARKER: u32 = 0;

/// 에러 프레임 마커 (데이터 블록 번호로는 절대 쓰이지 않음)
pub const ERROR_MARKER: u32 = u32::MAX;

/// 에러 프레임 사유 최대 길이
const MAX_REASON_LEN: usize = 512;

/// 파일 전체의 MD5 다이제스트
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ContentHash(pub [u8; HASH_LEN]);

impl ContentHash {
    pub fn of(data: &[u8]) -> Self {
        Self(md5::compute(data).0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// 메타데이터 프레임 (전송 식별용, 블록 번호 없음)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFrame {
    pub file_size: u32,
    pub content_hash: ContentHash,
    pub total_blocks: u32,
    pub file_name: String,
}

impl MetadataFrame {
    pub fn to_bytes(&self, buffer_size: usize) -> Result<Bytes, FrameError> {
        encode_metadata(
            self.file_size,
            &self.content_hash,
            self.total_blocks,
            &self.file_name,
            buffer_size,
        )
    }
}

/// 데이터 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub index: BlockIndex,
    pub payload: Bytes,
}

impl DataFrame {
    pub fn new(index: BlockIndex, payload: Bytes) -> Self {
        Self { index, payload }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DATA_HEADER_SIZE + self.payload.len());
        buf.put_u32(self.index);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// 디코딩된 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Metadata(MetadataFrame),
    Data(DataFrame),
    /// 응답측이 요청을 처리할 수 없을 때 보내는 센티넬
    Error(String),
}

impl Frame {
    /// 바이트에서 프레임 디코딩
    ///
    /// 첫 4바이트가 0이면 메타데이터, `ERROR_MARKER`면 에러,
    /// 그 외에는 데이터 블록 번호
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < DATA_HEADER_SIZE {
            return Err(FrameError::TooShort {
                min: DATA_HEADER_SIZE,
                got: bytes.len(),
            });
        }

        let marker = read_u32(bytes, 0);
        match marker {
            METADATA_MARKER => decode_metadata(bytes).map(Frame::Metadata),
            ERROR_MARKER => {
                let reason = String::from_utf8_lossy(&bytes[DATA_HEADER_SIZE..]).into_owned();
                Ok(Frame::Error(reason))
            }
            index => Ok(Frame::Data(DataFrame {
                index,
                payload: Bytes::copy_from_slice(&bytes[DATA_HEADER_SIZE..]),
            })),
        }
    }
}

/// 메타데이터 프레임 인코딩
///
/// 파일 이름에는 길이 접두사가 없으므로 NUL을 포함할 수 없고
/// 한 프레임 안에 들어가야 함
pub fn encode_metadata(
    file_size: u32,
    content_hash: &ContentHash,
    total_blocks: u32,
    file_name: &str,
    buffer_size: usize,
) -> Result<Bytes, FrameError> {
    validate_name(file_name)?;

    let max_name = buffer_size.saturating_sub(METADATA_HEADER_SIZE);
    if file_name.len() > max_name {
        return Err(FrameError::TooLarge {
            max: buffer_size,
            got: METADATA_HEADER_SIZE + file_name.len(),
        });
    }

    let mut buf = BytesMut::with_capacity(METADATA_HEADER_SIZE + file_name.len());
    buf.put_u32(METADATA_MARKER);
    buf.put_u32(file_size);
    buf.put_slice(&content_hash.0);
    buf.put_u32(total_blocks);
    buf.put_slice(file_name.as_bytes());
    Ok(buf.freeze())
}

/// 에러 프레임 인코딩
pub fn encode_error(reason: &str) -> Bytes {
    let mut end = reason.len().min(MAX_REASON_LEN);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }

    let mut buf = BytesMut::with_capacity(DATA_HEADER_SIZE + end);
    buf.put_u32(ERROR_MARKER);
    buf.put_slice(&reason.as_bytes()[..end]);
    buf.freeze()
}

fn decode_metadata(bytes: &[u8]) -> Result<MetadataFrame, FrameError> {
    if bytes.len() < METADATA_HEADER_SIZE {
        return Err(FrameError::TooShort {
            min: METADATA_HEADER_SIZE,
            got: bytes.len(),
        });
    }

    let file_size = read_u32(bytes, 4);
    let mut hash = [0u8; HASH_LEN];
    hash.copy_from_slice(&bytes[8..8 + HASH_LEN]);
    let total_blocks = read_u32(bytes, 24);

    // 이름은 첫 NUL 또는 버퍼 끝까지
    let name_bytes = &bytes[METADATA_HEADER_SIZE..];
    let end = name_bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(name_bytes.len());
    let file_name = std::str::from_utf8(&name_bytes[..end])
        .map_err(|_| {
            FrameError::InvalidName(String::from_utf8_lossy(&name_bytes[..end]).into_owned())
        })?
        .to_string();
    validate_name(&file_name)?;

    Ok(MetadataFrame {
        file_size,
        content_hash: ContentHash(hash),
        total_blocks,
        file_name,
    })
}

fn validate_name(name: &str) -> Result<(), FrameError> {
    if name.is_empty() || name.contains('\0') {
        return Err(FrameError::InvalidName(name.replace('\0', "\\0")));
    }
    Ok(())
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
