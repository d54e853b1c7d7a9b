//! PFT 송신자
//!
//! 수신자에 연결해 파일을 순서대로 전송
//!
//! 사용법:
//!   cargo run --release --bin pft-send -- --connect 127.0.0.1:9000 a.bin b.bin
//!
//! 예시:
//!   # 불안정한 네트워크 프리셋
//!   cargo run --release --bin pft-send -- -c 10.0.0.2:9000 --profile unstable data.bin

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use pft::{transport, Config, FileSource, LogReporter, MemoryOutput, Peer};

/// PFT 송신자
#[derive(Parser)]
#[command(name = "pft-send", version, about)]
struct Args {
    /// 수신자 주소
    #[arg(short, long, default_value = "127.0.0.1:9000")]
    connect: SocketAddr,

    /// 보낼 파일 (순서대로 전송)
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// 설정 프리셋 (default, unstable, fast)
    #[arg(short, long, default_value = "default", env = "PFT_PROFILE")]
    profile: String,

    /// 초기 청크 크기 (바이트)
    #[arg(long)]
    chunk_size: Option<usize>,

    /// 초기 윈도우 크기
    #[arg(long)]
    window: Option<usize>,

    /// ACK 타임아웃 (ms)
    #[arg(long)]
    ack_timeout_ms: Option<u64>,

    /// 청크별 최대 재시도
    #[arg(long)]
    max_retries: Option<u32>,

    /// 배치 후 수신자 종료 대기 시간 (초)
    #[arg(long, default_value_t = 10)]
    linger_secs: u64,
}

impl Args {
    fn config(&self) -> pft::Result<Config> {
        let mut config = Config::from_profile(&self.profile)?;
        if let Some(chunk_size) = self.chunk_size {
            config.initial_chunk_size = chunk_size;
        }
        if let Some(window) = self.window {
            config.initial_window_size = window;
        }
        if let Some(ms) = self.ack_timeout_ms {
            config.ack_timeout_ms = ms;
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        config.validate()?;
        Ok(config)
    }
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
    let config = args.config()?;
    info!("설정: {:?}", config);

    let link = transport::connect(args.connect).await?;
    let (peer, _events) = Peer::start(
        link,
        config,
        Arc::new(MemoryOutput::new()),
        Arc::new(LogReporter),
    );

    let sources = args.files.iter().map(FileSource::path);
    let report = peer.send_files(sources).await?;

    for file in &report.files {
        info!("{} ({} bytes): {}", file.filename, file.size, file.stats.summary());
    }
    info!(
        "전송 완료: 파일 {}개, {} bytes",
        report.files.len(),
        report.total_bytes()
    );

    // 수신자가 검증을 마치고 연결을 닫을 때까지 대기
    if tokio::time::timeout(Duration::from_secs(args.linger_secs), peer.closed())
        .await
        .is_err()
    {
        warn!("수신자 종료 대기 시간 초과");
    }

    Ok(())
}
