//! 세션 프로토콜
//!
//! 명령 문법 (ASCII, 공백 구분, 데이터그램/줄 하나에 명령 하나):
//!
//! ```text
//! GET <name>
//! RECOVER <name> [<block> ...]
//! DISCARD <name> <block> ...
//! BUILD <name>
//! SHOW
//! QUIT
//! ```
//!
//! 응답측은 GET/RECOVER만 처리하며, 명령을 보낼 프레임 목록으로 바꿈

use std::fmt;

use bytes::Bytes;
use tracing::{debug, info};

use crate::frame::{BlockIndex, ContentHash, MetadataFrame};
use crate::splitter::BlockSplitter;
use crate::store::ByteStore;
use crate::{Config, Error, Result};

/// 명령
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { name: String },
    Recover { name: String, indices: Vec<BlockIndex> },
    Discard { name: String, indices: Vec<BlockIndex> },
    Build { name: String },
    Show,
    Quit,
}

impl Command {
    /// 텍스트 명령 파싱
    ///
    /// 알 수 없는 명령이나 인자 부족은 네트워크를 건드리기 전에 `Error::Command`
    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = text.split_whitespace();
        let verb = tokens
            .next()
            .ok_or_else(|| Error::command("빈 명령"))?;
        let args: Vec<&str> = tokens.collect();

        let command = match verb {
            "GET" => {
                expect_args(verb, &args, 1, Some(1))?;
                Command::Get {
                    name: args[0].to_string(),
                }
            }
            "RECOVER" => {
                expect_args(verb, &args, 1, None)?;
                Command::Recover {
                    name: args[0].to_string(),
                    indices: parse_indices(&args[1..])?,
                }
            }
            "DISCARD" => {
                expect_args(verb, &args, 2, None)?;
                Command::Discard {
                    name: args[0].to_string(),
                    indices: parse_indices(&args[1..])?,
                }
            }
            "BUILD" => {
                expect_args(verb, &args, 1, Some(1))?;
                Command::Build {
                    name: args[0].to_string(),
                }
            }
            "SHOW" => {
                expect_args(verb, &args, 0, Some(0))?;
                Command::Show
            }
            "QUIT" => {
                expect_args(verb, &args, 0, Some(0))?;
                Command::Quit
            }
            other => return Err(Error::command(format!("알 수 없는 명령: {}", other))),
        };

        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Get { name } => write!(f, "GET {}", name),
            Command::Recover { name, indices } => {
                write!(f, "RECOVER {}", name)?;
                write_indices(f, indices)
            }
            Command::Discard { name, indices } => {
                write!(f, "DISCARD {}", name)?;
                write_indices(f, indices)
            }
            Command::Build { name } => write!(f, "BUILD {}", name),
            Command::Show => write!(f, "SHOW"),
            Command::Quit => write!(f, "QUIT"),
        }
    }
}

fn write_indices(f: &mut fmt::Formatter<'_>, indices: &[BlockIndex]) -> fmt::Result {
    for index in indices {
        write!(f, " {}", index)?;
    }
    Ok(())
}

fn expect_args(verb: &str, args: &[&str], min: usize, max: Option<usize>) -> Result<()> {
    if args.len() < min {
        return Err(Error::command(format!(
            "{}: 인자 부족 (최소 {}개, got {})",
            verb,
            min,
            args.len()
        )));
    }
    if let Some(max) = max {
        if args.len() > max {
            return Err(Error::command(format!(
                "{}: 인자 과다 (최대 {}개, got {})",
                verb,
                max,
                args.len()
            )));
        }
    }
    Ok(())
}

fn parse_indices(tokens: &[&str]) -> Result<Vec<BlockIndex>> {
    tokens
        .iter()
        .map(|token| {
            token
                .parse::<BlockIndex>()
                .map_err(|_| Error::command(format!("유효하지 않은 블록 번호: {}", token)))
        })
        .collect()
}

/// 응답측 명령 처리기
///
/// 상태가 없으므로 여러 태스크에서 공유해도 됨
#[derive(Debug)]
pub struct Responder<S> {
    store: S,
    splitter: BlockSplitter,
    buffer_size: usize,
}

impl<S: ByteStore> Responder<S> {
    pub fn new(config: &Config, store: S) -> Self {
        Self {
            store,
            splitter: BlockSplitter::from_config(config),
            buffer_size: config.buffer_size,
        }
    }

    /// 명령 텍스트를 보낼 프레임 목록으로 변환
    ///
    /// - `GET <name>` / `RECOVER <name>`: 메타데이터 + 전체 블록
    /// - `RECOVER <name> i...`: 요청한 블록만, 요청 순서대로
    pub fn handle_command(&self, text: &str) -> Result<Vec<Bytes>> {
        let command = Command::parse(text)?;

        match command {
            Command::Get { name } => self.serve_full(&name),
            Command::Recover { name, indices } if indices.is_empty() => self.serve_full(&name),
            Command::Recover { name, indices } => self.serve_blocks(&name, &indices),
            other => Err(Error::command(format!(
                "응답측에서 처리하지 않는 명령: {}",
                other
            ))),
        }
    }

    fn serve_full(&self, name: &str) -> Result<Vec<Bytes>> {
        let data = self.load(name)?;
        let blocks = self.splitter.split(&data);

        let metadata = MetadataFrame {
            file_size: data.len() as u32,
            content_hash: ContentHash::of(&data),
            total_blocks: blocks.len() as u32,
            file_name: name.to_string(),
        }
        .to_bytes(self.buffer_size)
        .map_err(|e| Error::file(name, e))?;

        let mut frames = Vec::with_capacity(1 + blocks.len());
        frames.push(metadata);
        frames.extend(blocks.iter().map(|block| block.to_bytes()));

        info!("GET {}: {} bytes, {} 블록", name, data.len(), blocks.len());
        Ok(frames)
    }

    fn serve_blocks(&self, name: &str, indices: &[BlockIndex]) -> Result<Vec<Bytes>> {
        let data = self.load(name)?;
        let frames: Vec<Bytes> = self
            .splitter
            .select(&data, indices)
            .iter()
            .map(|block| block.to_bytes())
            .collect();

        debug!(
            "RECOVER {}: 요청 {}개 중 {}개 블록",
            name,
            indices.len(),
            frames.len()
        );
        Ok(frames)
    }

    fn load(&self, name: &str) -> Result<Bytes> {
        let stat = self.store.stat(name)?;
        if stat.is_dir {
            return Err(Error::file(name, "디렉터리임"));
        }
        if !self.splitter.fits(stat.len) {
            return Err(Error::file(name, format!("파일이 너무 큼: {} bytes", stat.len)));
        }
        self.store.read_all(name)
    }
}
