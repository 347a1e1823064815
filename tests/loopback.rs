//! 루프백 통합 테스트: 실제 UDP 소켓으로 서버와 요청자를 연결하고
//! 재조립된 파일이 원본과 같은지 확인

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use dftp::{
    Config, ContentHash, DirStore, Error, Outcome, Requester, Server, TransferStats,
};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn start_server(
    config: Config,
    root: &Path,
) -> (SocketAddr, Arc<Mutex<TransferStats>>) {
    let server = Server::bind(config, "127.0.0.1:0".parse().unwrap(), DirStore::new(root))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let stats = server.stats_handle();
    tokio::spawn(server.run());
    (addr, stats)
}

async fn connect(config: Config, server: SocketAddr, out: &Path) -> Requester<DirStore> {
    Requester::connect(config, "127.0.0.1:0".parse().unwrap(), server, DirStore::new(out))
        .await
        .unwrap()
}

fn client_config() -> Config {
    Config {
        recv_timeout_ms: 300,
        max_retries: 20,
        ..Config::default()
    }
}

async fn build(requester: &mut Requester<DirStore>, name: &str) -> bool {
    match requester.execute_line(&format!("BUILD {}", name)).await.unwrap() {
        Outcome::Built { verified, .. } => verified,
        other => panic!("BUILD 결과가 아님: {:?}", other),
    }
}

#[tokio::test]
async fn loopback_reference_file() {
    let root = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let data = pattern(5000);
    std::fs::write(root.path().join("ref.bin"), &data).unwrap();

    let (addr, _) = start_server(Config::default(), root.path()).await;
    let mut requester = connect(client_config(), addr, out.path()).await;

    let outcome = requester.execute_line("GET ref.bin").await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Transferred {
            name: "ref.bin".into(),
            received: 3,
            total: Some(3)
        }
    );

    let session = requester.sessions().get("ref.bin").unwrap();
    assert_eq!(session.file_size, 5000);
    assert_eq!(session.content_hash, ContentHash::of(&data));
    assert_eq!(session.block(3).unwrap().len(), 912);

    assert!(build(&mut requester, "ref.bin").await);
    assert_eq!(std::fs::read(out.path().join("ref.bin")).unwrap(), data);
    assert!(requester.status().contains("integrity: ok"));
}

#[tokio::test]
async fn loopback_discard_build_recover() {
    let root = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let data = pattern(5000);
    std::fs::write(root.path().join("ref.bin"), &data).unwrap();

    let (addr, _) = start_server(Config::default(), root.path()).await;
    let mut requester = connect(client_config(), addr, out.path()).await;

    requester.execute_line("GET ref.bin").await.unwrap();
    requester.execute_line("DISCARD ref.bin 3").await.unwrap();

    assert!(!build(&mut requester, "ref.bin").await);
    let partial = std::fs::read(out.path().join("ref.bin")).unwrap();
    assert_eq!(partial.len(), 4088);

    requester.execute_line("RECOVER ref.bin 3").await.unwrap();
    assert!(build(&mut requester, "ref.bin").await);
    assert_eq!(
        ContentHash::of(&std::fs::read(out.path().join("ref.bin")).unwrap()),
        ContentHash::of(&data)
    );
}

#[tokio::test]
async fn loopback_boundary_and_empty_files() {
    let root = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("two.bin"), pattern(4088)).unwrap();
    std::fs::write(root.path().join("empty.bin"), b"").unwrap();

    let (addr, _) = start_server(Config::default(), root.path()).await;
    let mut requester = connect(client_config(), addr, out.path()).await;

    let outcome = requester.execute_line("GET two.bin").await.unwrap();
    assert!(matches!(outcome, Outcome::Transferred { received: 2, total: Some(2), .. }));
    assert!(build(&mut requester, "two.bin").await);

    let outcome = requester.execute_line("GET empty.bin").await.unwrap();
    assert!(matches!(outcome, Outcome::Transferred { received: 0, total: Some(0), .. }));
    assert!(build(&mut requester, "empty.bin").await);
    assert!(std::fs::read(out.path().join("empty.bin")).unwrap().is_empty());
}

#[tokio::test]
async fn loopback_missing_file_gets_error_frame() {
    let root = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let (addr, stats) = start_server(Config::default(), root.path()).await;
    let mut requester = connect(client_config(), addr, out.path()).await;

    let err = requester.execute_line("GET nope.bin").await.unwrap_err();
    assert!(matches!(err, Error::File { .. }), "got {:?}", err);
    assert_eq!(stats.lock().file_errors, 1);
    assert!(!out.path().join("nope.bin").exists());
}

#[tokio::test]
async fn loopback_lossy_link_recovers() {
    let root = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let data = pattern(200 * 1024);
    std::fs::write(root.path().join("big.bin"), &data).unwrap();

    let server_config = Config {
        drop_ratio: 0.3,
        ..Config::lossy_link()
    };
    let (addr, stats) = start_server(server_config, root.path()).await;
    let mut requester = connect(client_config(), addr, out.path()).await;

    let outcome = requester.execute_line("GET big.bin").await.unwrap();
    let total = (200 * 1024 + 2043) / 2044;
    assert_eq!(
        outcome,
        Outcome::Transferred {
            name: "big.bin".into(),
            received: total,
            total: Some(total as u32)
        }
    );
    assert!(stats.lock().frames_dropped > 0);
    assert!(requester.stats().retries > 0);

    assert!(build(&mut requester, "big.bin").await);
    assert_eq!(std::fs::read(out.path().join("big.bin")).unwrap(), data);
}
