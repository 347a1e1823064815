//! 전송 상태 (수신측)
//!
//! 파일 이름별 세션이 어떤 블록을 받았는지, 몇 블록을 기다리는지,
//! 어디에 구멍이 있는지 추적

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::FrameError;
use crate::frame::{BlockIndex, ContentHash, Frame, MetadataFrame};
use crate::splitter::format_ranges;

/// 프레임 관찰 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Metadata,
    Block { index: BlockIndex, duplicate: bool },
    /// 응답측이 보낸 에러 프레임
    RemoteError(String),
}

/// 현재 수신 라운드
///
/// `requested`가 `None`이면 전체 전송(GET), 아니면 부분 복구
#[derive(Debug, Clone, Default)]
struct Round {
    requested: Option<BTreeSet<BlockIndex>>,
    arrived: BTreeSet<BlockIndex>,
}

/// 파일 하나의 수신 세션
#[derive(Debug, Clone)]
pub struct TransferSession {
    pub file_name: String,
    pub file_size: u32,
    pub content_hash: ContentHash,

    /// 메타데이터 수신 전에는 `None`
    pub total_blocks: Option<u32>,

    /// 현재 라운드에서 기다리는 블록 수, 모르면 `None`
    pub expected_blocks: Option<u32>,

    /// 마지막 BUILD 실행 여부
    pub built: bool,

    /// 마지막 BUILD의 무결성 검증 결과
    pub integrity: Option<bool>,

    received: BTreeMap<BlockIndex, Bytes>,
    round: Round,
    payload_cap: usize,
}

impl TransferSession {
    pub fn new(file_name: impl Into<String>, payload_cap: usize) -> Self {
        Self {
            file_name: file_name.into(),
            file_size: 0,
            content_hash: ContentHash::default(),
            total_blocks: None,
            expected_blocks: None,
            built: false,
            integrity: None,
            received: BTreeMap::new(),
            round: Round::default(),
            payload_cap,
        }
    }

    /// 프레임 하나를 세션에 반영
    pub fn observe(&mut self, frame: Frame) -> Result<Observed, FrameError> {
        match frame {
            Frame::Metadata(meta) => {
                self.apply_metadata(meta)?;
                Ok(Observed::Metadata)
            }
            Frame::Data(data) => {
                if data.payload.len() > self.payload_cap {
                    return Err(FrameError::TooLarge {
                        max: self.payload_cap,
                        got: data.payload.len(),
                    });
                }
                match self.total_blocks {
                    Some(total) => {
                        if data.index > total {
                            return Err(FrameError::BlockOutOfRange {
                                index: data.index,
                                total,
                            });
                        }
                        let expected =
                            block_len(data.index, total, self.file_size, self.payload_cap);
                        if data.payload.len() != expected {
                            return Err(FrameError::BlockLength {
                                index: data.index,
                                expected,
                                got: data.payload.len(),
                            });
                        }
                    }
                    None => {
                        // 메타데이터 전에는 u32 파일 크기로 가능한 최대 블록 수까지만
                        let limit = max_block_count(self.payload_cap);
                        if data.index > limit {
                            return Err(FrameError::BlockOutOfRange {
                                index: data.index,
                                total: limit,
                            });
                        }
                    }
                }

                // 같은 번호는 같은 내용으로 덮어씀
                let duplicate = self.received.insert(data.index, data.payload).is_some();
                if self.in_round(data.index) {
                    self.round.arrived.insert(data.index);
                }

                Ok(Observed::Block {
                    index: data.index,
                    duplicate,
                })
            }
            Frame::Error(reason) => Ok(Observed::RemoteError(reason)),
        }
    }

    fn apply_metadata(&mut self, meta: MetadataFrame) -> Result<(), FrameError> {
        let cap = self.payload_cap as u64;
        let expected = (meta.file_size as u64 + cap - 1) / cap;
        if expected != meta.total_blocks as u64 {
            return Err(FrameError::BlockCountMismatch {
                file_size: meta.file_size,
                expected: expected as u32,
                got: meta.total_blocks,
            });
        }

        if meta.file_name != self.file_name {
            warn!(
                "메타데이터 이름 불일치: session={}, frame={}",
                self.file_name, meta.file_name
            );
        }

        self.file_size = meta.file_size;
        self.content_hash = meta.content_hash;
        self.total_blocks = Some(meta.total_blocks);
        if self.round.requested.is_none() {
            self.expected_blocks = Some(meta.total_blocks);
        }

        // 메타데이터보다 먼저 도착한 블록 중 범위나 길이가 맞지 않는 것 정리
        let total = meta.total_blocks;
        let (file_size, cap) = (self.file_size, self.payload_cap);
        let before = self.received.len();
        self.received.retain(|&index, block| {
            index <= total && block.len() == block_len(index, total, file_size, cap)
        });
        let received = &self.received;
        self.round.arrived.retain(|index| received.contains_key(index));
        if self.received.len() < before {
            warn!(
                "{}: 맞지 않는 블록 {}개 제거",
                self.file_name,
                before - self.received.len()
            );
        }

        debug!(
            "메타데이터: {} size={} md5={} blocks={}",
            self.file_name, self.file_size, self.content_hash, total
        );
        Ok(())
    }

    fn in_round(&self, index: BlockIndex) -> bool {
        match &self.round.requested {
            Some(requested) => requested.contains(&index),
            None => true,
        }
    }

    /// 새 전송 시작 (GET): 이전에 받은 블록과 메타데이터를 버림
    pub fn restart(&mut self) {
        self.received.clear();
        self.total_blocks = None;
        self.expected_blocks = None;
        self.file_size = 0;
        self.content_hash = ContentHash::default();
        self.built = false;
        self.integrity = None;
        self.round = Round::default();
    }

    /// 새 라운드 시작
    ///
    /// `Some(indices)`면 부분 복구 라운드로, 기대 블록 수가 요청 개수가 됨.
    /// `None`이면 전체 라운드로, 기대 블록 수는 `total_blocks`
    pub fn begin_round(&mut self, requested: Option<BTreeSet<BlockIndex>>) {
        self.expected_blocks = match &requested {
            Some(indices) => Some(indices.len() as u32),
            None => self.total_blocks,
        };
        self.round = Round {
            requested,
            arrived: BTreeSet::new(),
        };
    }

    /// 현재 라운드 완료 여부
    ///
    /// 전체 라운드는 `len(received) == expected`,
    /// 부분 복구 라운드는 이번 라운드에 도착한 요청 블록 수 기준
    pub fn is_complete(&self) -> bool {
        let Some(expected) = self.expected_blocks else {
            return false;
        };
        let counted = match self.round.requested {
            Some(_) => self.round.arrived.len(),
            None => self.received.len(),
        };
        counted == expected as usize
    }

    /// 현재 라운드에서 아직 도착하지 않은 블록
    ///
    /// 전체 라운드에서 메타데이터를 아직 못 받았으면 `None`
    pub fn outstanding(&self) -> Option<BTreeSet<BlockIndex>> {
        match &self.round.requested {
            Some(requested) => Some(requested.difference(&self.round.arrived).copied().collect()),
            None => self.missing_below_total(),
        }
    }

    /// 관찰된 범위 `[min, max]` 안의 구멍
    ///
    /// 가장 큰 수신 번호 뒤에 빠진 블록은 더 큰 번호가 올 때까지 보고되지 않음
    pub fn missing_blocks(&self) -> BTreeSet<BlockIndex> {
        let (Some((&min, _)), Some((&max, _))) =
            (self.received.first_key_value(), self.received.last_key_value())
        else {
            return BTreeSet::new();
        };

        let max = self.total_blocks.map_or(max, |total| max.min(total));
        (min..=max)
            .filter(|index| !self.received.contains_key(index))
            .collect()
    }

    /// `[1, total_blocks]` 중 받지 못한 모든 블록 (메타데이터 필요)
    pub fn missing_below_total(&self) -> Option<BTreeSet<BlockIndex>> {
        let total = self.total_blocks?;
        Some(
            (1..=total)
                .filter(|index| !self.received.contains_key(index))
                .collect(),
        )
    }

    /// 블록 버리기 (손실 시뮬레이션)
    pub fn discard(&mut self, indices: &[BlockIndex]) -> usize {
        let mut discarded = 0;
        for index in indices {
            if self.received.remove(index).is_some() {
                discarded += 1;
            }
            self.round.arrived.remove(index);
        }
        discarded
    }

    pub fn block(&self, index: BlockIndex) -> Option<&Bytes> {
        self.received.get(&index)
    }

    pub fn received_count(&self) -> usize {
        self.received.len()
    }

    pub fn received_indices(&self) -> impl Iterator<Item = BlockIndex> + '_ {
        self.received.keys().copied()
    }
}

/// `total` 블록짜리 파일에서 `index` 블록의 길이 (마지막 블록만 짧을 수 있음)
fn block_len(index: BlockIndex, total: u32, file_size: u32, cap: usize) -> usize {
    if index < total {
        cap
    } else {
        file_size as usize - (total as usize - 1) * cap
    }
}

/// u32 크기 파일이 가질 수 있는 최대 블록 수
fn max_block_count(cap: usize) -> u32 {
    let cap = cap.max(1) as u64;
    ((u32::MAX as u64 + cap - 1) / cap).min(u32::MAX as u64 - 1) as u32
}

impl fmt::Display for TransferSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "---------------------------")?;
        writeln!(f, "File: {}", self.file_name)?;
        writeln!(f, "\tSize: {} bytes", self.file_size)?;
        writeln!(f, "\tMD5: {}", self.content_hash)?;
        writeln!(f, "\tReceived blocks: {}", self.received.len())?;
        match self.total_blocks {
            Some(total) => writeln!(f, "\tTotal blocks: {}", total)?,
            None => writeln!(f, "\tTotal blocks: unknown (no metadata)")?,
        }

        let gaps = self.missing_blocks();
        if !gaps.is_empty() {
            writeln!(f, "\t\tGaps (observed range): {}", format_ranges(&gaps))?;
        }
        if let Some(missing) = self.missing_below_total() {
            if !missing.is_empty() {
                writeln!(f, "\t\tMissing (of total): {}", format_ranges(&missing))?;
            }
        }

        let integrity = match self.integrity {
            Some(true) => "ok",
            Some(false) => "FAILED",
            None => "not checked",
        };
        write!(f, "\tBuilt: {} (integrity: {})", self.built, integrity)
    }
}

/// 수신측 세션 저장소 (요청자 소유)
#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions: BTreeMap<String, TransferSession>,
    payload_cap: usize,
}

impl SessionStore {
    pub fn new(payload_cap: usize) -> Self {
        Self {
            sessions: BTreeMap::new(),
            payload_cap,
        }
    }

    pub fn get_or_create(&mut self, name: &str) -> &mut TransferSession {
        let payload_cap = self.payload_cap;
        self.sessions
            .entry(name.to_string())
            .or_insert_with(|| TransferSession::new(name, payload_cap))
    }

    pub fn get(&self, name: &str) -> Option<&TransferSession> {
        self.sessions.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut TransferSession> {
        self.sessions.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransferSession> {
        self.sessions.values()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// 모든 세션 상태 요약
    pub fn status(&self) -> String {
        if self.is_empty() {
            return "No files to show".to_string();
        }

        self.iter()
            .map(|session| session.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DataFrame;

    fn data(index: BlockIndex, payload: &'static [u8]) -> Frame {
        Frame::Data(DataFrame::new(index, Bytes::from_static(payload)))
    }

    fn meta(file_size: u32, total_blocks: u32) -> Frame {
        Frame::Metadata(MetadataFrame {
            file_size,
            content_hash: ContentHash::of(b"x"),
            total_blocks,
            file_name: "f.bin".to_string(),
        })
    }

    #[test]
    fn test_metadata_sets_expectation() {
        let mut session = TransferSession::new("f.bin", 10);
        assert_eq!(session.expected_blocks, None);
        assert!(!session.is_complete());

        assert_eq!(session.observe(meta(25, 3)).unwrap(), Observed::Metadata);
        assert_eq!(session.total_blocks, Some(3));
        assert_eq!(session.expected_blocks, Some(3));
        assert_eq!(session.file_size, 25);
    }

    #[test]
    fn test_metadata_block_count_mismatch() {
        let mut session = TransferSession::new("f.bin", 10);
        assert_eq!(
            session.observe(meta(25, 4)),
            Err(FrameError::BlockCountMismatch {
                file_size: 25,
                expected: 3,
                got: 4
            })
        );
        assert_eq!(session.total_blocks, None);
    }

    #[test]
    fn test_idempotent_observation() {
        let mut session = TransferSession::new("f.bin", 10);
        session.observe(data(2, b"abc")).unwrap();
        let first = session.received.clone();

        assert_eq!(
            session.observe(data(2, b"abc")).unwrap(),
            Observed::Block {
                index: 2,
                duplicate: true
            }
        );
        assert_eq!(session.received, first);
        assert_eq!(session.received_count(), 1);
    }

    #[test]
    fn test_complete_in_any_order() {
        let mut session = TransferSession::new("f.bin", 10);
        session.observe(data(3, b"tail")).unwrap();
        session.observe(data(1, b"0123456789")).unwrap();
        assert!(!session.is_complete());

        session.observe(meta(24, 3)).unwrap();
        assert!(!session.is_complete());

        session.observe(data(2, b"0123456789")).unwrap();
        assert!(session.is_complete());
    }

    #[test]
    fn test_gap_detection_observed_range() {
        let mut session = TransferSession::new("f.bin", 10);
        for index in [1, 2, 5, 6, 9] {
            session.observe(data(index, b"x")).unwrap();
        }

        let gaps: Vec<BlockIndex> = session.missing_blocks().into_iter().collect();
        assert_eq!(gaps, vec![3, 4, 7, 8]);

        // 메타데이터 없이는 전체 기준 누락을 알 수 없음
        assert_eq!(session.missing_below_total(), None);
    }

    #[test]
    fn test_tail_loss_not_reported_as_gap() {
        let mut session = TransferSession::new("f.bin", 1);
        session.observe(meta(12, 12)).unwrap();
        for index in [1, 2, 3, 5] {
            session.observe(data(index, b"x")).unwrap();
        }

        let gaps: Vec<BlockIndex> = session.missing_blocks().into_iter().collect();
        assert_eq!(gaps, vec![4]);

        let all: Vec<BlockIndex> = session.missing_below_total().unwrap().into_iter().collect();
        assert_eq!(all, vec![4, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_recovery_round_closes_gaps() {
        let mut session = TransferSession::new("f.bin", 1);
        session.observe(meta(9, 9)).unwrap();
        for index in [1, 2, 5, 6, 9] {
            session.observe(data(index, b"x")).unwrap();
        }

        let gaps = session.missing_blocks();
        session.begin_round(Some(gaps.clone()));
        assert_eq!(session.expected_blocks, Some(4));
        assert!(!session.is_complete());

        // 요청하지 않은 블록은 라운드에 세지 않음
        session.observe(data(1, b"x")).unwrap();
        for index in [3, 4, 7] {
            session.observe(data(index, b"x")).unwrap();
        }
        assert!(!session.is_complete());
        assert_eq!(session.outstanding().unwrap().into_iter().collect::<Vec<_>>(), vec![8]);

        session.observe(data(8, b"x")).unwrap();
        assert!(session.is_complete());
        assert!(session.missing_blocks().is_empty());
        assert!(session.missing_below_total().unwrap().is_empty());
    }

    #[test]
    fn test_out_of_range_blocks() {
        let mut session = TransferSession::new("f.bin", 10);
        session.observe(data(7, b"early")).unwrap();
        session.observe(data(1, b"0123456789")).unwrap();

        // 메타데이터가 범위 밖 블록을 정리
        session.observe(meta(15, 2)).unwrap();
        assert_eq!(session.received_indices().collect::<Vec<_>>(), vec![1]);

        assert_eq!(
            session.observe(data(3, b"x")),
            Err(FrameError::BlockOutOfRange { index: 3, total: 2 })
        );
        assert!(matches!(
            session.observe(Frame::Data(DataFrame::new(2, Bytes::from(vec![0u8; 11])))),
            Err(FrameError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_block_length_checked_against_metadata() {
        let mut session = TransferSession::new("f.bin", 10);
        session.observe(meta(24, 3)).unwrap();

        assert_eq!(
            session.observe(data(1, b"short")),
            Err(FrameError::BlockLength {
                index: 1,
                expected: 10,
                got: 5
            })
        );
        assert_eq!(
            session.observe(data(3, b"tails")),
            Err(FrameError::BlockLength {
                index: 3,
                expected: 4,
                got: 5
            })
        );
        assert!(session.observe(data(2, b"")).is_err());
        assert_eq!(session.received_count(), 0);

        session.observe(data(3, b"tail")).unwrap();
        session.observe(data(1, b"0123456789")).unwrap();
        session.observe(data(2, b"0123456789")).unwrap();
        assert!(session.is_complete());
    }

    #[test]
    fn test_metadata_prunes_wrong_length_blocks() {
        let mut session = TransferSession::new("f.bin", 10);
        session.observe(data(1, b"x")).unwrap();
        session.observe(data(2, b"0123456789")).unwrap();

        session.observe(meta(24, 3)).unwrap();
        assert_eq!(session.received_indices().collect::<Vec<_>>(), vec![2]);
        assert_eq!(
            session.missing_blocks().into_iter().collect::<Vec<_>>(),
            Vec::<BlockIndex>::new()
        );
    }

    #[test]
    fn test_stray_index_before_metadata() {
        let mut session = TransferSession::new("f.bin", 2044);
        assert!(matches!(
            session.observe(data(u32::MAX - 1, b"x")),
            Err(FrameError::BlockOutOfRange { .. })
        ));
        assert_eq!(max_block_count(2044), 2_101_257);

        session.observe(data(1, b"x")).unwrap();
        session.observe(data(4, b"x")).unwrap();
        assert_eq!(
            session.missing_blocks().into_iter().collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert!(session.to_string().contains("Gaps (observed range): 2-3"));
    }

    #[test]
    fn test_discard() {
        let mut session = TransferSession::new("f.bin", 1);
        session.observe(meta(3, 3)).unwrap();
        for index in 1..=3 {
            session.observe(data(index, b"x")).unwrap();
        }
        assert!(session.is_complete());

        assert_eq!(session.discard(&[2, 2, 9]), 1);
        assert!(!session.is_complete());
        assert_eq!(
            session.missing_blocks().into_iter().collect::<Vec<_>>(),
            vec![2]
        );
    }

    #[test]
    fn test_remote_error_passthrough() {
        let mut session = TransferSession::new("f.bin", 10);
        assert_eq!(
            session.observe(Frame::Error("gone".into())).unwrap(),
            Observed::RemoteError("gone".into())
        );
    }

    #[test]
    fn test_status_shows_missing_and_integrity() {
        let mut store = SessionStore::new(1);
        assert_eq!(store.status(), "No files to show");

        let session = store.get_or_create("f.bin");
        session.observe(meta(5, 5)).unwrap();
        for index in [1, 2, 4] {
            session.observe(data(index, b"x")).unwrap();
        }
        session.built = true;
        session.integrity = Some(false);

        let status = store.status();
        assert!(status.contains("File: f.bin"));
        assert!(status.contains("Received blocks: 3"));
        assert!(status.contains("Total blocks: 5"));
        assert!(status.contains("Gaps (observed range): 3"));
        assert!(status.contains("Missing (of total): 3 5"));
        assert!(status.contains("Built: true (integrity: FAILED)"));
    }
}
