//! 메시지 채널 경계
//!
//! - `FrameSink`: 프레임 하나를 보내고 바로 반환 (fire-and-forget)
//! - `Link`: 송신 싱크 + 수신 프레임 스트림
//! - `MemoryChannel`: 프로세스 내 링크 쌍, 프레임별 유실/중복/지연 시뮬레이션 지원

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::trace;

use crate::message::Frame;
use crate::{Error, Result};

/// 프레임 송신 인터페이스
///
/// 전송 순서는 보장되지 않으며, 호출자는 전달 여부를 기다리지 않음
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: Frame) -> Result<()>;
}

/// 양방향 링크의 한쪽 끝
pub struct Link {
    pub sink: Arc<dyn FrameSink>,
    pub inbound: mpsc::UnboundedReceiver<Frame>,
}

/// 프레임 전달 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Deliver,
    Drop,
    Duplicate,
    Delay(Duration),
}

/// 프레임마다 전달 방식을 정하는 정책
pub type DeliveryPolicy = Arc<dyn Fn(&Frame) -> Delivery + Send + Sync>;

struct MemorySink {
    tx: mpsc::UnboundedSender<Frame>,
    policy: Option<DeliveryPolicy>,
}

impl FrameSink for MemorySink {
    fn send(&self, frame: Frame) -> Result<()> {
        if self.tx.is_closed() {
            return Err(Error::ChannelClosed);
        }

        let delivery = self
            .policy
            .as_ref()
            .map(|policy| policy(&frame))
            .unwrap_or(Delivery::Deliver);

        match delivery {
            Delivery::Deliver => self.tx.send(frame).map_err(|_| Error::ChannelClosed),
            Delivery::Drop => {
                trace!("프레임 유실: {:?}", frame.msg_type());
                Ok(())
            }
            Delivery::Duplicate => {
                self.tx
                    .send(frame.clone())
                    .map_err(|_| Error::ChannelClosed)?;
                self.tx.send(frame).map_err(|_| Error::ChannelClosed)
            }
            Delivery::Delay(delay) => {
                // 런타임 안에서 호출되어야 함
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(frame);
                });
                Ok(())
            }
        }
    }
}

/// 프로세스 내 채널
pub struct MemoryChannel;

impl MemoryChannel {
    /// 손실 없는 링크 쌍
    pub fn pair() -> (Link, Link) {
        Self::pair_with(None, None)
    }

    /// 방향별 전달 정책을 가진 링크 쌍
    ///
    /// `a_to_b`는 첫 번째 링크가 보내는 프레임에, `b_to_a`는 두 번째 링크가 보내는 프레임에 적용
    pub fn pair_with(
        a_to_b: Option<DeliveryPolicy>,
        b_to_a: Option<DeliveryPolicy>,
    ) -> (Link, Link) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = Link {
            sink: Arc::new(MemorySink {
                tx: b_tx,
                policy: a_to_b,
            }),
            inbound: a_rx,
        };
        let b = Link {
            sink: Arc::new(MemorySink {
                tx: a_tx,
                policy: b_to_a,
            }),
            inbound: b_rx,
        };
        (a, b)
    }
}

/// 무작위 채널 상태 (데이터 경로에만 적용)
///
/// file-chunk와 chunk-ack 프레임만 유실/중복/지연되며, 나머지 프레임은 그대로 전달
#[derive(Debug, Clone)]
pub struct LinkConditions {
    /// 유실 확률 (0.0 ~ 1.0)
    pub loss_rate: f64,
    /// 중복 확률
    pub duplicate_rate: f64,
    /// 최대 지연 (0이면 지연 없음)
    pub max_jitter: Duration,
    /// 난수 시드
    pub seed: u64,
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            max_jitter: Duration::ZERO,
            seed: 0,
        }
    }
}

impl LinkConditions {
    pub fn into_policy(self) -> DeliveryPolicy {
        let rng = Mutex::new(StdRng::seed_from_u64(self.seed));
        Arc::new(move |frame: &Frame| {
            if !matches!(frame, Frame::FileChunk { .. } | Frame::ChunkAck { .. }) {
                return Delivery::Deliver;
            }

            let mut rng = rng.lock();
            if rng.gen_bool(self.loss_rate.clamp(0.0, 1.0)) {
                Delivery::Drop
            } else if rng.gen_bool(self.duplicate_rate.clamp(0.0, 1.0)) {
                Delivery::Duplicate
            } else if !self.max_jitter.is_zero() {
                let micros = self.max_jitter.as_micros() as u64;
                Delivery::Delay(Duration::from_micros(rng.gen_range(0..=micros)))
            } else {
                Delivery::Deliver
            }
        })
    }
}
