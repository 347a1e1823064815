//! 응답측 서버
//!
//! - 수신 루프는 명령 데이터그램만 받아서 처리 태스크로 넘김
//! - 명령 처리는 파일 I/O가 있으므로 blocking 풀에서 실행
//! - 응답 프레임 묶음은 송신 큐 하나로 모아서 보냄
//!   (한 명령의 프레임이 다른 명령의 프레임과 섞이지 않음)

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::frame::{encode_error, ERROR_MARKER, METADATA_MARKER};
use crate::protocol::Responder;
use crate::stats::TransferStats;
use crate::store::ByteStore;
use crate::{Config, Error, Result, MAX_DATAGRAM_SIZE};

/// 응답 묶음: 한 명령에 대한 프레임 목록과 목적지
type ReplyBatch = (Vec<Bytes>, SocketAddr);

/// DFTP 서버
pub struct Server<S> {
    socket: Arc<UdpSocket>,
    responder: Arc<Responder<S>>,
    config: Config,
    stats: Arc<Mutex<TransferStats>>,
}

impl<S: ByteStore + 'static> Server<S> {
    /// 소켓 바인딩
    pub async fn bind(config: Config, addr: SocketAddr, store: S) -> Result<Self> {
        config.validate()?;

        let socket = UdpSocket::bind(addr).await?;
        info!("DFTP Server listening on {}", socket.local_addr()?);
        if config.drop_ratio > 0.0 {
            info!(
                "손실 시뮬레이션: 데이터 프레임 {:.1}% 버림",
                config.drop_ratio * 100.0
            );
        }

        Ok(Self {
            socket: Arc::new(socket),
            responder: Arc::new(Responder::new(&config, store)),
            config,
            stats: Arc::new(Mutex::new(TransferStats::new())),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> TransferStats {
        self.stats.lock().clone()
    }

    /// 통계 핸들 (run 이후에도 읽기 위함)
    pub fn stats_handle(&self) -> Arc<Mutex<TransferStats>> {
        self.stats.clone()
    }

    /// 수신 루프 실행 (종료하지 않음)
    pub async fn run(self) -> Result<()> {
        let (send_tx, send_rx) = mpsc::channel::<ReplyBatch>(self.config.send_queue_size);
        self.spawn_send_task(send_rx);

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, addr) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("수신 에러: {}", e);
                    continue;
                }
            };

            let text = match std::str::from_utf8(&buf[..len]) {
                Ok(text) => text.trim_end_matches('\0').to_string(),
                Err(_) => {
                    warn!("UTF-8이 아닌 명령 무시: {} ({} bytes)", addr, len);
                    continue;
                }
            };
            debug!("< {} from {}", text, addr);

            let responder = self.responder.clone();
            let stats = self.stats.clone();
            let send_tx = send_tx.clone();

            tokio::task::spawn_blocking(move || {
                stats.lock().commands += 1;

                let frames = match responder.handle_command(&text) {
                    Ok(frames) => frames,
                    Err(e @ Error::File { .. }) => {
                        warn!("{} 요청 실패: {}", addr, e);
                        stats.lock().file_errors += 1;
                        vec![encode_error(&e.to_string())]
                    }
                    Err(e) => {
                        warn!("명령 무시 ({}): {}", addr, e);
                        return;
                    }
                };

                if send_tx.blocking_send((frames, addr)).is_err() {
                    warn!("송신 큐 닫힘");
                }
            });
        }
    }

    /// 송신 태스크: 응답 묶음을 순서대로, 설정된 간격으로 전송
    fn spawn_send_task(&self, mut send_rx: mpsc::Receiver<ReplyBatch>) {
        let socket = self.socket.clone();
        let stats = self.stats.clone();
        let interval = self.config.frame_interval();
        let drop_ratio = self.config.drop_ratio;

        tokio::spawn(async move {
            while let Some((frames, addr)) = send_rx.recv().await {
                let total = frames.len();
                let mut dropped = 0u64;

                for frame in frames {
                    if drop_ratio > 0.0
                        && is_data_frame(&frame)
                        && rand::random::<f64>() < drop_ratio
                    {
                        dropped += 1;
                        continue;
                    }

                    if let Err(e) = socket.send_to(&frame, addr).await {
                        warn!("{} 전송 실패: {}", addr, e);
                        continue;
                    }
                    stats.lock().record_sent(frame.len());

                    if !interval.is_zero() {
                        tokio::time::sleep(interval).await;
                    }
                }

                stats.lock().frames_dropped += dropped;
                debug!("{} 프레임 전송 -> {} ({} 버림)", total, addr, dropped);
            }
        });
    }
}

/// 데이터 프레임인지 (메타데이터/에러 프레임은 손실 시뮬레이션 대상 아님)
fn is_data_frame(frame: &[u8]) -> bool {
    if frame.len() < 4 {
        return false;
    }
    let mut header = &frame[..4];
    let marker = header.get_u32();
    marker != METADATA_MARKER && marker != ERROR_MARKER
}
