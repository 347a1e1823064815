//! 블록 분할기 (응답측)
//!
//! 파일 바이트를 `payload_cap` 크기의 블록으로 나누고 1부터 번호를 붙임.
//! 블록 `i`는 파일의 `[(i-1)*cap, i*cap)` 구간을 담음

use std::collections::BTreeSet;

use bytes::Bytes;

use crate::frame::{BlockIndex, DataFrame, ERROR_MARKER};
use crate::Config;

/// 블록 분할기
#[derive(Debug, Clone)]
pub struct BlockSplitter {
    payload_cap: usize,
}

impl BlockSplitter {
    pub fn new(payload_cap: usize) -> Self {
        assert!(payload_cap > 0, "payload_cap must be non-zero");
        Self { payload_cap }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.payload_capacity())
    }

    pub fn payload_cap(&self) -> usize {
        self.payload_cap
    }

    /// 파일 크기에 대한 블록 수: `ceil(file_size / cap)`, 빈 파일은 0
    pub fn total_blocks(&self, file_size: u64) -> u64 {
        (file_size + self.payload_cap as u64 - 1) / self.payload_cap as u64
    }

    /// 블록 번호로 표현 가능한 크기인지 확인
    pub fn fits(&self, file_size: u64) -> bool {
        file_size <= u32::MAX as u64 && self.total_blocks(file_size) < ERROR_MARKER as u64
    }

    /// 파일 데이터를 순서대로 번호 붙은 데이터 프레임으로 분할
    pub fn split(&self, data: &Bytes) -> Vec<DataFrame> {
        data.chunks(self.payload_cap)
            .enumerate()
            .map(|(idx, chunk)| {
                let offset = idx * self.payload_cap;
                DataFrame::new(
                    (idx + 1) as BlockIndex,
                    data.slice(offset..offset + chunk.len()),
                )
            })
            .collect()
    }

    /// 요청된 블록만 요청 순서대로 반환
    ///
    /// 전체 블록 집합을 다시 계산한 뒤 `[1, N]` 밖의 번호는 조용히 버림
    pub fn select(&self, data: &Bytes, indices: &[BlockIndex]) -> Vec<DataFrame> {
        let blocks = self.split(data);

        indices
            .iter()
            .filter_map(|&index| {
                let slot = (index as usize).checked_sub(1)?;
                blocks.get(slot).cloned()
            })
            .collect()
    }
}

/// 오름차순 블록 번호 목록을 `1-3 5 7-8` 형태의 범위 문자열로 변환
pub fn format_ranges(indices: &BTreeSet<BlockIndex>) -> String {
    let mut parts = Vec::new();
    let mut iter = indices.iter().copied();

    let Some(mut start) = iter.next() else {
        return String::new();
    };
    let mut end = start;

    for index in iter {
        if index == end + 1 {
            end = index;
            continue;
        }
        parts.push(range_str(start, end));
        start = index;
        end = index;
    }
    parts.push(range_str(start, end));

    parts.join(" ")
}

fn range_str(start: BlockIndex, end: BlockIndex) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}-{}", start, end)
    }
}
