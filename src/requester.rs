//! 요청자 (클라이언트측)
//!
//! - 명령을 응답측에 보내고 프레임이 도착하는 대로 세션에 반영
//! - 다음 프레임을 기다리는 지점에 데드라인이 있고,
//!   만료되면 남은 블록을 재요청 (재시도 예산 소진 시 `Error::Timeout`)
//! - DISCARD/BUILD/SHOW는 로컬에서만 처리

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::error::FrameError;
use crate::frame::{BlockIndex, Frame};
use crate::protocol::Command;
use crate::reassembler::{BuildReport, Reassembler};
use crate::stats::TransferStats;
use crate::store::{validate_file_name, ByteStore};
use crate::transfer::{Observed, SessionStore};
use crate::{Config, Error, Result, MAX_DATAGRAM_SIZE};

/// 명령 실행 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// GET/RECOVER 라운드 완료
    Transferred {
        name: String,
        received: usize,
        total: Option<u32>,
    },
    Discarded { name: String, count: usize },
    /// BUILD 완료 (검증 실패여도 세션은 계속 사용 가능)
    Built { report: BuildReport, verified: bool },
    Status(String),
    Quit,
}

/// 요청자
pub struct Requester<S> {
    config: Config,
    outbound: mpsc::Sender<Bytes>,
    inbound: mpsc::Receiver<Bytes>,
    sessions: SessionStore,
    reassembler: Reassembler<S>,
    stats: TransferStats,
    /// 마지막으로 응답측에 요청한 파일
    active: Option<String>,
}

impl<S: ByteStore> Requester<S> {
    /// 채널로 연결된 요청자 생성
    ///
    /// `outbound`로 명령 텍스트를 보내고 `inbound`로 프레임을 받음
    pub fn new(
        config: Config,
        outbound: mpsc::Sender<Bytes>,
        inbound: mpsc::Receiver<Bytes>,
        store: S,
    ) -> Self {
        Self {
            sessions: SessionStore::new(config.payload_capacity()),
            reassembler: Reassembler::new(store),
            stats: TransferStats::new(),
            active: None,
            config,
            outbound,
            inbound,
        }
    }

    /// UDP 소켓에 연결된 요청자 생성
    ///
    /// 송신 태스크와 수신 태스크를 띄우고, 응답측 주소가 아닌 곳에서 온
    /// 데이터그램은 버림
    pub async fn connect(
        config: Config,
        bind_addr: SocketAddr,
        server_addr: SocketAddr,
        store: S,
    ) -> Result<Self> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        info!(
            "DFTP Requester bound to {}, server: {}",
            socket.local_addr()?,
            server_addr
        );

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Bytes>(config.send_queue_size);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Bytes>(config.recv_queue_size);

        // 송신 태스크
        let send_socket = socket.clone();
        tokio::spawn(async move {
            while let Some(bytes) = outbound_rx.recv().await {
                if let Err(e) = send_socket.send_to(&bytes, server_addr).await {
                    warn!("명령 전송 실패: {}", e);
                }
            }
        });

        // 수신 태스크
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, addr)) => {
                        if addr != server_addr {
                            debug!("알 수 없는 송신자 무시: {}", addr);
                            continue;
                        }
                        if inbound_tx
                            .send(Bytes::copy_from_slice(&buf[..len]))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("수신 에러: {}", e);
                    }
                }
            }
        });

        Ok(Self::new(config, outbound_tx, inbound_rx, store))
    }

    /// 텍스트 명령 실행
    pub async fn execute_line(&mut self, text: &str) -> Result<Outcome> {
        let command = Command::parse(text)?;
        self.execute(command).await
    }

    /// 명령 실행
    pub async fn execute(&mut self, command: Command) -> Result<Outcome> {
        self.stats.commands += 1;

        match command {
            Command::Get { name } => self.get(name).await,
            Command::Recover { name, indices } => self.recover(name, indices).await,
            Command::Discard { name, indices } => self.discard(name, &indices),
            Command::Build { name } => self.build(&name),
            Command::Show => Ok(Outcome::Status(self.status())),
            Command::Quit => Ok(Outcome::Quit),
        }
    }

    async fn get(&mut self, name: String) -> Result<Outcome> {
        validate_file_name(&name)?;
        if name.len() > self.config.max_name_len() {
            return Err(Error::command(format!(
                "파일 이름이 메타데이터 프레임에 들어가지 않음: {} bytes (최대 {})",
                name.len(),
                self.config.max_name_len()
            )));
        }

        let session = self.sessions.get_or_create(&name);
        session.restart();
        session.begin_round(None);

        let wire = vec![Command::Get { name: name.clone() }.to_string()];
        self.transfer(name, wire).await
    }

    async fn recover(&mut self, name: String, indices: Vec<BlockIndex>) -> Result<Outcome> {
        let session = self
            .sessions
            .get_mut(&name)
            .ok_or_else(|| Error::UnknownSession(name.clone()))?;

        let explicit = !indices.is_empty();
        let mut requested: BTreeSet<BlockIndex> = if explicit {
            indices.into_iter().collect()
        } else {
            session.missing_blocks()
        };

        // 응답측이 조용히 버릴 번호는 라운드에서 제외
        let total = session.total_blocks.unwrap_or(u32::MAX - 1);
        requested.retain(|&index| index >= 1 && index <= total);

        let wire = if requested.is_empty() {
            if explicit {
                return Err(Error::command(format!(
                    "{}: 요청한 블록이 모두 범위 밖",
                    name
                )));
            }
            // 관찰 범위 안에 구멍이 없으면 전체 재전송
            info!("{}: 관찰 범위 안에 구멍 없음, 전체 재전송 요청", name);
            session.begin_round(None);
            vec![Command::Recover {
                name: name.clone(),
                indices: Vec::new(),
            }
            .to_string()]
        } else {
            session.begin_round(Some(requested.clone()));
            recover_commands(&name, &requested, self.config.buffer_size)
        };

        self.stats.recovery_rounds += 1;
        self.transfer(name, wire).await
    }

    fn discard(&mut self, name: String, indices: &[BlockIndex]) -> Result<Outcome> {
        let session = self
            .sessions
            .get_mut(&name)
            .ok_or_else(|| Error::UnknownSession(name.clone()))?;

        let count = session.discard(indices);
        info!("{}: {}개 블록 버림", name, count);
        Ok(Outcome::Discarded { name, count })
    }

    fn build(&mut self, name: &str) -> Result<Outcome> {
        let session = self
            .sessions
            .get_mut(name)
            .ok_or_else(|| Error::UnknownSession(name.to_string()))?;

        let report = self.reassembler.build(session)?;
        session.built = true;

        let verified = match self.reassembler.verify(session) {
            Ok(()) => true,
            Err(e @ Error::Integrity { .. }) => {
                warn!("{}", e);
                false
            }
            Err(e) => {
                session.integrity = Some(false);
                return Err(e);
            }
        };
        session.integrity = Some(verified);

        if verified {
            info!("{}: 파일 전송 성공", name);
        }
        Ok(Outcome::Built { report, verified })
    }

    /// 명령을 보내고 라운드가 끝날 때까지 프레임 수신
    async fn transfer(&mut self, name: String, wire: Vec<String>) -> Result<Outcome> {
        self.drain_stale();
        self.active = Some(name.clone());

        for text in &wire {
            self.send(text).await?;
        }

        let mut retries_left = self.config.max_retries;
        let mut deadline = Instant::now() + self.config.recv_timeout();

        while !self.session_complete(&name) {
            match timeout_at(deadline, self.inbound.recv()).await {
                Ok(Some(bytes)) => {
                    deadline = Instant::now() + self.config.recv_timeout();
                    match self.observe(&bytes) {
                        Ok(_) => {}
                        Err(Error::Frame(e)) => {
                            warn!("프레임 버림: {}", e);
                            self.stats.rejected_frames += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(None) => return Err(Error::ChannelClosed),
                Err(_) => {
                    let outstanding = self
                        .sessions
                        .get(&name)
                        .and_then(|session| session.outstanding());

                    if retries_left == 0 {
                        return Err(Error::Timeout {
                            name,
                            outstanding: outstanding.map(|set| set.len()).unwrap_or(0),
                        });
                    }
                    retries_left -= 1;
                    self.stats.retries += 1;

                    // 메타데이터를 못 받았으면 원래 명령을 다시 보냄
                    let resend = match outstanding {
                        Some(missing) if !missing.is_empty() => {
                            recover_commands(&name, &missing, self.config.buffer_size)
                        }
                        _ => wire.clone(),
                    };
                    warn!(
                        "{}: 수신 타임아웃, 재요청 ({}회 남음)",
                        name, retries_left
                    );
                    for text in &resend {
                        self.send(text).await?;
                    }
                    deadline = Instant::now() + self.config.recv_timeout();
                }
            }
        }

        let session = self
            .sessions
            .get(&name)
            .ok_or_else(|| Error::UnknownSession(name.clone()))?;
        info!(
            "{}: 라운드 완료 ({} 블록 보유)",
            name,
            session.received_count()
        );
        Ok(Outcome::Transferred {
            name,
            received: session.received_count(),
            total: session.total_blocks,
        })
    }

    /// 프레임 바이트 하나를 현재 전송 세션에 반영
    pub fn observe(&mut self, bytes: &[u8]) -> Result<Observed> {
        let name = self
            .active
            .clone()
            .ok_or_else(|| Error::command("진행 중인 전송 없음"))?;

        let frame = Frame::decode(bytes)?;
        if let Frame::Metadata(meta) = &frame {
            if meta.file_name != name {
                return Err(Error::Frame(FrameError::InvalidName(format!(
                    "다른 전송의 메타데이터: {}",
                    meta.file_name
                ))));
            }
        }

        let session = self.sessions.get_or_create(&name);
        let observed = session.observe(frame)?;

        match &observed {
            Observed::Metadata => self.stats.record_received(bytes.len()),
            Observed::Block { duplicate, .. } => {
                self.stats.record_received(bytes.len());
                if *duplicate {
                    self.stats.duplicate_blocks += 1;
                }
            }
            Observed::RemoteError(reason) => {
                return Err(Error::File {
                    name,
                    reason: reason.clone(),
                });
            }
        }
        Ok(observed)
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        debug!("> {}", text);
        self.outbound
            .send(Bytes::copy_from_slice(text.as_bytes()))
            .await
            .map_err(|_| Error::ChannelClosed)?;
        self.stats.record_sent(text.len());
        Ok(())
    }

    /// 이전 명령에서 늦게 도착한 프레임 버리기
    fn drain_stale(&mut self) {
        let mut drained = 0;
        while self.inbound.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            debug!("늦게 도착한 프레임 {}개 버림", drained);
        }
    }

    fn session_complete(&self, name: &str) -> bool {
        self.sessions
            .get(name)
            .map(|session| session.is_complete())
            .unwrap_or(false)
    }

    /// 모든 세션 상태 요약 (SHOW)
    pub fn status(&self) -> String {
        self.sessions.status()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn store(&self) -> &S {
        self.reassembler.store()
    }
}

/// 블록 목록을 데이터그램 하나에 들어가는 RECOVER 명령들로 나눔
fn recover_commands(name: &str, indices: &BTreeSet<BlockIndex>, max_len: usize) -> Vec<String> {
    let prefix = format!("RECOVER {}", name);
    let mut commands = Vec::new();
    let mut current = prefix.clone();

    for index in indices {
        let token = format!(" {}", index);
        if current.len() + token.len() > max_len && current.len() > prefix.len() {
            commands.push(std::mem::replace(&mut current, prefix.clone()));
        }
        current.push_str(&token);
    }
    if current.len() > prefix.len() {
        commands.push(current);
    }
    commands
}
