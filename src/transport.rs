//! TCP 링크
//!
//! 스트림 위에 `u32` LE 길이 접두사 + 인코딩된 프레임.
//! 쓰기/읽기 태스크를 하나씩 두고 `Link`로 노출.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{FrameSink, Link};
use crate::message::{Frame, FRAME_HEADER_LEN};
use crate::{Error, Result, MAX_CHUNK_SIZE};

/// 프레임 최대 길이 (최대 청크 + 헤더/필드 여유분)
pub const MAX_FRAME_LEN: usize = MAX_CHUNK_SIZE + FRAME_HEADER_LEN + 4096;

struct TcpSink {
    tx: mpsc::UnboundedSender<Frame>,
}

impl FrameSink for TcpSink {
    fn send(&self, frame: Frame) -> Result<()> {
        self.tx.send(frame).map_err(|_| Error::ChannelClosed)
    }
}

/// 서버에 연결
pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Link> {
    let stream = TcpStream::connect(addr).await?;
    info!("연결됨: {}", stream.peer_addr()?);
    from_stream(stream)
}

/// 연결 하나 수락
pub async fn accept(listener: &TcpListener) -> Result<(Link, SocketAddr)> {
    let (stream, addr) = listener.accept().await?;
    info!("연결 수락: {}", addr);
    Ok((from_stream(stream)?, addr))
}

/// 연결된 스트림을 링크로 변환 (런타임 안에서 호출)
pub fn from_stream(stream: TcpStream) -> Result<Link> {
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        if let Err(e) = write_loop(write_half, out_rx).await {
            warn!("쓰기 태스크 종료: {}", e);
        }
    });
    tokio::spawn(async move {
        if let Err(e) = read_loop(read_half, in_tx).await {
            debug!("읽기 태스크 종료: {}", e);
        }
    });

    Ok(Link {
        sink: std::sync::Arc::new(TcpSink { tx: out_tx }),
        inbound: in_rx,
    })
}

async fn write_loop(half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Frame>) -> Result<()> {
    let mut writer = BufWriter::new(half);
    while let Some(frame) = rx.recv().await {
        write_frame(&mut writer, &frame).await?;

        // 이미 쌓인 프레임은 모아서 한 번에 flush
        while let Ok(frame) = rx.try_recv() {
            write_frame(&mut writer, &frame).await?;
        }
        writer.flush().await?;
    }
    writer.shutdown().await?;
    Ok(())
}

async fn write_frame(writer: &mut BufWriter<OwnedWriteHalf>, frame: &Frame) -> Result<()> {
    let encoded = frame.encode()?;
    writer.write_u32_le(encoded.len() as u32).await?;
    writer.write_all(&encoded).await?;
    Ok(())
}

async fn read_loop(half: OwnedReadHalf, tx: mpsc::UnboundedSender<Frame>) -> Result<()> {
    let mut reader = BufReader::new(half);
    let mut buf = Vec::new();

    loop {
        let len = match reader.read_u32_le().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if len > MAX_FRAME_LEN {
            // 길이 접두사가 깨지면 스트림을 다시 맞출 수 없음
            return Err(Error::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }

        buf.resize(len, 0);
        reader.read_exact(&mut buf).await?;

        match Frame::decode(&buf) {
            Ok(frame) => {
                if tx.send(frame).is_err() {
                    return Ok(());
                }
            }
            // 손상된 프레임은 유실로 취급 (송신측이 재전송)
            Err(e) => warn!("프레임 폐기: {}", e),
        }
    }
}
