//! DFTP 서버 (응답측)
//!
//! 지정한 디렉터리의 파일을 GET/RECOVER 명령에 따라 블록 단위로 전송
//!
//! 사용법:
//!   cargo run --release --bin dftp-server -- [OPTIONS]
//!
//! 예시:
//!   # 현재 디렉터리 공유
//!   cargo run --release --bin dftp-server -- --bind 0.0.0.0:8080
//!
//!   # 데이터 프레임 10% 손실 시뮬레이션
//!   cargo run --release --bin dftp-server -- --root ./files --drop 0.1

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dftp::{Config, DirStore, Server, DEFAULT_PORT};

/// 서버 실행 설정
struct ServerOptions {
    bind_addr: SocketAddr,
    root: PathBuf,
    stats_interval: Option<Duration>,
    config: Config,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            root: PathBuf::from("."),
            stats_interval: None,
            config: Config::default(),
        }
    }
}

fn parse_args() -> ServerOptions {
    let args: Vec<String> = std::env::args().collect();
    let mut options = ServerOptions::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    options.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--root" | "-r" => {
                if i + 1 < args.len() {
                    options.root = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--preset" => {
                if i + 1 < args.len() {
                    options.config = match args[i + 1].as_str() {
                        "local" => Config::local(),
                        "lossy" => Config::lossy_link(),
                        other => panic!("알 수 없는 프리셋: {}", other),
                    };
                    i += 1;
                }
            }
            "--buffer-size" => {
                if i + 1 < args.len() {
                    options.config.buffer_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--interval" => {
                if i + 1 < args.len() {
                    options.config.frame_interval_us =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--drop" => {
                if i + 1 < args.len() {
                    options.config.drop_ratio = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--stats" => {
                if i + 1 < args.len() {
                    let secs: u64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    options.stats_interval = Some(Duration::from_secs(secs.max(1)));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"DFTP Server - 데이터그램 파일 전송 서버

GET/RECOVER 명령을 받아 파일을 메타데이터 + 데이터 프레임으로 전송

사용법:
  cargo run --release --bin dftp-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>       바인드 주소 (기본: 0.0.0.0:8080)
  -r, --root <DIR>        공유 디렉터리 (기본: 현재 디렉터리)
  --preset <NAME>         설정 프리셋 local | lossy (다른 설정 옵션보다 먼저 지정)
  --buffer-size <SIZE>    프레임 최대 크기 바이트 (기본: 2048)
  --interval <US>         프레임 전송 간격 마이크로초 (기본: 0)
  --drop <RATIO>          데이터 프레임 손실 시뮬레이션 비율 0.0~1.0 (기본: 0)
  --stats <SECS>          통계 출력 주기 초 (기본: 출력 안 함)
  -h, --help              이 도움말 출력

환경 변수:
  RUST_LOG                로그 필터 (기본: info)
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    options
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = parse_args();

    info!("DFTP Server starting...");
    info!("Root directory: {:?}", options.root);
    info!("Buffer size: {} bytes", options.config.buffer_size);
    info!("Frame interval: {} us", options.config.frame_interval_us);

    let store = DirStore::new(options.root);
    let server = Server::bind(options.config, options.bind_addr, store).await?;

    if let Some(period) = options.stats_interval {
        let stats = server.stats_handle();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!("{}", stats.lock().summary());
            }
        });
    }

    server.run().await?;
    Ok(())
}
