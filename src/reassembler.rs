//! 재조립기
//!
//! 받은 블록을 1..=total_blocks 순서로 써서 파일을 만들고
//! 디스크의 바이트로 MD5를 다시 계산해 검증

use bytes::{Bytes, BytesMut};
use tracing::{info, warn};

use crate::frame::{BlockIndex, ContentHash};
use crate::store::ByteStore;
use crate::transfer::TransferSession;
use crate::{Error, Result};

/// BUILD 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub file_name: String,
    pub written_blocks: u32,
    pub written_bytes: u64,
    /// 없어서 건너뛴 블록 (있으면 결과 파일이 짧음)
    pub skipped: Vec<BlockIndex>,
}

impl BuildReport {
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }
}

/// 세션 블록을 바이트 저장소에 쓰는 재조립기
#[derive(Debug, Clone)]
pub struct Reassembler<S> {
    store: S,
}

impl<S: ByteStore> Reassembler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// 블록을 순서대로 써서 파일 생성
    ///
    /// 빠진 블록은 중단하지 않고 건너뜀. 이후 블록이 앞으로 당겨지므로
    /// 결과 파일은 짧고 손상된 상태가 되며, RECOVER 후 다시 BUILD 하면 됨
    pub fn build(&self, session: &TransferSession) -> Result<BuildReport> {
        let total = session
            .total_blocks
            .ok_or_else(|| Error::MissingMetadata(session.file_name.clone()))?;

        self.store.create(&session.file_name)?;

        let mut report = BuildReport {
            file_name: session.file_name.clone(),
            written_blocks: 0,
            written_bytes: 0,
            skipped: Vec::new(),
        };

        for index in 1..=total {
            let Some(block) = session.block(index) else {
                warn!("{}: 블록 {} 없음, 건너뜀", session.file_name, index);
                report.skipped.push(index);
                continue;
            };

            self.store
                .write_range(&session.file_name, report.written_bytes, block)?;
            report.written_blocks += 1;
            report.written_bytes += block.len() as u64;
        }

        info!(
            "BUILD {}: {}/{} 블록, {} bytes",
            session.file_name, report.written_blocks, total, report.written_bytes
        );
        Ok(report)
    }

    /// 디스크에 쓰인 파일의 MD5를 메타데이터 해시와 비교
    pub fn verify(&self, session: &TransferSession) -> Result<()> {
        let data = self.store.read_all(&session.file_name)?;
        let actual = ContentHash::of(&data);

        if actual != session.content_hash {
            return Err(Error::Integrity {
                name: session.file_name.clone(),
                expected: session.content_hash.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }
}

/// 메모리에서 블록을 순서대로 이어 붙임 (빠진 블록은 건너뜀)
pub fn assemble(session: &TransferSession) -> Bytes {
    let mut buf = BytesMut::with_capacity(session.file_size as usize);
    let last = session
        .total_blocks
        .or_else(|| session.received_indices().last())
        .unwrap_or(0);

    for index in 1..=last {
        if let Some(block) = session.block(index) {
            buf.extend_from_slice(block);
        }
    }
    buf.freeze()
}
