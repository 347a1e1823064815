//! DFTP 클라이언트 (요청측)
//!
//! 대화형으로 명령을 입력받아 파일을 받고, 블록을 버리거나 복구하고,
//! 받은 블록으로 파일을 재조립
//!
//! 사용법:
//!   cargo run --release --bin dftp-client -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin dftp-client -- --server 127.0.0.1:8080 --output ./downloads

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dftp::requester::Outcome;
use dftp::{Config, DirStore, Requester, DEFAULT_PORT};

const MENU: &str = r#"Commands:
  GET <file>                  파일 전체 요청
  RECOVER <file> [i j ...]    누락 블록 복구 (번호 생략 시 관찰된 구멍 전부)
  DISCARD <file> i [j ...]    받은 블록 버리기 (손실 시뮬레이션)
  BUILD <file>                받은 블록으로 파일 생성 후 MD5 검증
  SHOW                        전송 상태 출력
  QUIT                        종료"#;

/// 클라이언트 실행 설정
struct ClientOptions {
    bind_addr: SocketAddr,
    server_addr: SocketAddr,
    output_dir: PathBuf,
    config: Config,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            server_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            output_dir: PathBuf::from("."),
            config: Config::default(),
        }
    }
}

fn parse_args() -> ClientOptions {
    let args: Vec<String> = std::env::args().collect();
    let mut options = ClientOptions::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    options.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    options.server_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    options.output_dir = PathBuf::from(&args[i + 1]);
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
            "--timeout" => {
                if i + 1 < args.len() {
                    options.config.recv_timeout_ms = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--retries" => {
                if i + 1 < args.len() {
                    options.config.max_retries = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"DFTP Client - 데이터그램 파일 전송 클라이언트

사용법:
  cargo run --release --bin dftp-client -- [OPTIONS]

옵션:
  -b, --bind <ADDR>       로컬 바인드 주소 (기본: 0.0.0.0:0 = 자동 할당)
  -s, --server <ADDR>     서버 주소 (기본: 127.0.0.1:8080)
  -o, --output <DIR>      재조립 파일 저장 디렉터리 (기본: 현재 디렉터리)
  --preset <NAME>         설정 프리셋 local | lossy (다른 설정 옵션보다 먼저 지정)
  --buffer-size <SIZE>    프레임 최대 크기 바이트 (기본: 2048, 서버와 같아야 함)
  --timeout <MS>          프레임 대기 시간 밀리초 (기본: 2000)
  --retries <N>           타임아웃 후 재요청 횟수 (기본: 3)
  -h, --help              이 도움말 출력

{}
"#,
                    MENU
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

    info!("DFTP Client starting...");
    info!("Server address: {}", options.server_addr);
    info!("Output directory: {:?}", options.output_dir);

    std::fs::create_dir_all(&options.output_dir)?;
    let store = DirStore::new(options.output_dir);
    let mut requester =
        Requester::connect(options.config, options.bind_addr, options.server_addr, store).await?;

    println!("{}", MENU);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match requester.execute_line(line).await {
            Ok(Outcome::Transferred {
                name,
                received,
                total,
            }) => match total {
                Some(total) => println!("{}: {}/{} 블록 수신", name, received, total),
                None => println!("{}: {} 블록 수신 (메타데이터 없음)", name, received),
            },
            Ok(Outcome::Discarded { name, count }) => {
                println!("{}: {}개 블록 버림", name, count)
            }
            Ok(Outcome::Built { report, verified }) => {
                println!(
                    "{}: {} 블록, {} bytes 작성",
                    report.file_name, report.written_blocks, report.written_bytes
                );
                if report.is_partial() {
                    println!("  누락 블록: {:?}", report.skipped);
                }
                if verified {
                    println!("  File transfer succeeded");
                } else {
                    println!("  File transfer failed (MD5 불일치)");
                }
            }
            Ok(Outcome::Status(status)) => println!("{}", status),
            Ok(Outcome::Quit) => break,
            Err(e) => println!("에러: {}", e),
        }
    }

    info!("{}", requester.stats().summary());
    Ok(())
}
