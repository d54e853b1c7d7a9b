//! PFT 수신자
//!
//! 연결 하나를 받아 검증된 파일을 디렉터리에 저장하고,
//! 예고된 파일 수만큼 처리하면 종료
//!
//! 사용법:
//!   cargo run --release --bin pft-recv -- --bind 0.0.0.0:9000 --output ./received

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use pft::{transport, Config, DirectoryOutput, LogReporter, Peer, ReceiveEvent};

/// PFT 수신자
#[derive(Parser)]
#[command(name = "pft-recv", version, about)]
struct Args {
    /// 수신 주소
    #[arg(short, long, default_value = "0.0.0.0:9000")]
    bind: SocketAddr,

    /// 저장 디렉터리
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// 설정 프리셋 (default, unstable, fast)
    #[arg(short, long, default_value = "default", env = "PFT_PROFILE")]
    profile: String,
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let args = Args::parse();
    let config = Config::from_profile(&args.profile)?;
    config.validate()?;

    tokio::fs::create_dir_all(&args.output).await?;
    let listener = TcpListener::bind(args.bind).await?;
    info!("PFT 수신자 대기 중: {} → {}", args.bind, args.output.display());

    let (link, addr) = transport::accept(&listener).await?;
    let (peer, mut events) = Peer::start(
        link,
        config,
        Arc::new(DirectoryOutput::new(&args.output)),
        Arc::new(LogReporter),
    );

    let mut expected: Option<u32> = None;
    let mut verified = 0u32;
    let mut failed = 0u32;

    while let Some(event) = events.recv().await {
        match event {
            ReceiveEvent::BatchAnnounced { total_files } => {
                expected = Some(total_files);
                verified = 0;
                failed = 0;
            }
            ReceiveEvent::Started { .. } => {}
            ReceiveEvent::Verified { .. } => verified += 1,
            ReceiveEvent::Failed {
                filename, error, ..
            } => {
                warn!("수신 실패: {} ({})", filename, error);
                failed += 1;
            }
        }

        if expected.is_some_and(|n| verified + failed >= n) {
            break;
        }
    }

    info!(
        "{} 수신 종료: 검증 {}개, 실패 {}개",
        addr, verified, failed
    );
    peer.stop();

    if failed > 0 {
        return Err(format!("{}개 파일 수신 실패", failed).into());
    }
    Ok(())
}
