//! 내구성 있는 발행/구독 채널 인터페이스.
//!
//! 전달은 at-least-once이며, 수신 측은 각 메시지에 대해 `ack` 또는 `nak`을
//! 정확히 한 번 호출해야 합니다. [`Delivery`]의 두 메서드는 `self`를 소비하므로
//! 두 번 호출하는 코드는 컴파일되지 않습니다.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// 전송 계층별 ack/nak 구현.
#[async_trait]
pub trait Acker: Send + Sync {
    /// 처리 완료. 재전달되지 않습니다.
    async fn ack(&self, id: &str) -> Result<()>;

    /// 처리 실패. 전송 계층이 나중에 재전달합니다.
    async fn nak(&self, id: &str) -> Result<()>;
}

/// 구독자에게 전달된 메시지 하나.
pub struct Delivery {
    /// 전송 계층의 메시지 ID
    pub id: String,
    /// 메시지가 속한 subject
    pub subject: String,
    /// 원본 바이트
    pub payload: Vec<u8>,
    /// 이 구독에서의 전달 횟수 (첫 전달 = 1)
    pub attempt: u32,
    acker: Arc<dyn Acker>,
}

impl Delivery {
    pub fn new(
        id: impl Into<String>,
        subject: impl Into<String>,
        payload: Vec<u8>,
        attempt: u32,
        acker: Arc<dyn Acker>,
    ) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            payload,
            attempt,
            acker,
        }
    }

    /// 처리 완료를 알립니다.
    pub async fn ack(self) -> Result<()> {
        self.acker.ack(&self.id).await
    }

    /// 재전달을 요청합니다.
    pub async fn nak(self) -> Result<()> {
        self.acker.nak(&self.id).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id)
            .field("subject", &self.subject)
            .field("payload_len", &self.payload.len())
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// durable 구독.
#[async_trait]
pub trait Subscription: Send {
    /// 다음 메시지를 기다립니다.
    ///
    /// 반환된 future를 중간에 drop해도 메시지는 유실되지 않습니다.
    /// 아직 ack되지 않은 메시지는 나중에 다시 전달됩니다.
    async fn next(&mut self) -> Result<Delivery>;

    /// 구독을 종료합니다. durable 이름에 묶인 상태는 전송 계층에 남습니다.
    async fn unsubscribe(&mut self) -> Result<()>;
}

/// 발행/구독 전송 계층.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// 스트림과 durable 구독을 준비합니다. 이미 존재하면 성공으로 처리합니다.
    async fn ensure_stream(&self, subject: &str, durable: &str) -> Result<()>;

    /// `subject`로 바이트를 발행합니다.
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<()>;

    /// `durable` 이름으로 `subject`를 구독합니다.
    async fn subscribe(&self, subject: &str, durable: &str) -> Result<Box<dyn Subscription>>;
}
