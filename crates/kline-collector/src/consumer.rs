//! 스트림 컨슈머.
//!
//! durable 구독에서 받은 배치를 디코딩해 저장소에 기록하고 결과에 따라
//! ack/nak을 보냅니다. 메시지는 하나씩 순서대로 처리하며, 취소 신호는
//! 메시지 사이에서만 확인합니다.
//!
//! ```text
//! Received -> Decoding -> DecodeFailed (nak) | Decoded
//! Decoded  -> Validating -> Empty (ack, 유효한 캔들 없음) | Persisting
//! Persisting -> PersistFailed (nak) | Persisted (ack)
//! ```

use std::sync::Arc;
use std::time::Duration;

use kline_core::{decode_batch, AppConfig};
use kline_data::{CandleRepository, DataError, Delivery, StreamTransport};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{CollectorError, Result};
use crate::service::retain_valid;

/// 구독 에러 후 다시 읽기 전 대기 시간.
const RECEIVE_ERROR_DELAY: Duration = Duration::from_secs(1);

/// 메시지에 대한 최종 응답.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nak,
}

/// 메시지 하나의 처리 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// 캔들이 없는 배치
    Empty,
    /// 저장 완료 (새로 기록된 행 수)
    Persisted(u64),
    /// 디코딩 실패
    DecodeFailed,
    /// 저장 실패
    PersistFailed,
    /// 전달 한도를 넘어 dead-letter subject로 옮김
    DeadLettered,
    /// dead-letter 발행 실패. 원본은 재전달을 기다린다
    DeadLetterFailed,
}

impl MessageOutcome {
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Empty | Self::Persisted(_) | Self::DeadLettered => Disposition::Ack,
            Self::DecodeFailed | Self::PersistFailed | Self::DeadLetterFailed => Disposition::Nak,
        }
    }
}

/// 캔들 배치 컨슈머.
pub struct CandleConsumer {
    repository: Arc<dyn CandleRepository>,
    transport: Arc<dyn StreamTransport>,
    subject: String,
    durable: String,
    /// 0이면 무제한 재전달
    max_deliveries: u32,
    dead_letter_subject: String,
}

impl CandleConsumer {
    pub fn new(
        repository: Arc<dyn CandleRepository>,
        transport: Arc<dyn StreamTransport>,
        subject: impl Into<String>,
        durable: impl Into<String>,
    ) -> Self {
        let subject = subject.into();
        Self {
            repository,
            transport,
            dead_letter_subject: format!("{}_dlq", subject),
            subject,
            durable: durable.into(),
            max_deliveries: 0,
        }
    }

    pub fn from_config(
        repository: Arc<dyn CandleRepository>,
        transport: Arc<dyn StreamTransport>,
        config: &AppConfig,
    ) -> Self {
        Self::new(
            repository,
            transport,
            config.stream.subject.clone(),
            config.stream.durable_name.clone(),
        )
        .with_dead_letter(
            config.stream.max_deliveries,
            config.stream.dead_letter_subject.clone(),
        )
    }

    /// 전달 한도와 dead-letter subject를 지정합니다. `max_deliveries`가 0이면 비활성.
    pub fn with_dead_letter(mut self, max_deliveries: u32, subject: impl Into<String>) -> Self {
        self.max_deliveries = max_deliveries;
        self.dead_letter_subject = subject.into();
        self
    }

    /// 페이로드를 디코딩하고 저장합니다. ack/nak은 호출자가 결정합니다.
    pub async fn handle(&self, payload: &[u8]) -> MessageOutcome {
        let candles = match decode_batch(payload) {
            Ok(candles) => candles,
            Err(e) => {
                warn!(subject = %self.subject, error = %e, "Failed to decode kline batch");
                return MessageOutcome::DecodeFailed;
            }
        };

        if candles.is_empty() {
            debug!(subject = %self.subject, "Empty kline batch");
            return MessageOutcome::Empty;
        }

        // 잘못된 캔들은 재전달해도 고쳐지지 않으므로 버리고 나머지만 저장한다
        let received = candles.len();
        let candles = retain_valid(&self.subject, candles);
        if candles.is_empty() {
            warn!(subject = %self.subject, received, "No valid klines in batch");
            return MessageOutcome::Empty;
        }

        match self.repository.insert_batch(&candles).await {
            Ok(inserted) => {
                debug!(
                    subject = %self.subject,
                    received,
                    valid = candles.len(),
                    inserted,
                    "Kline batch persisted"
                );
                MessageOutcome::Persisted(inserted)
            }
            Err(e) => {
                let e = CollectorError::PersistFailed(e);
                error!(subject = %self.subject, count = candles.len(), error = %e, "Failed to persist kline batch");
                MessageOutcome::PersistFailed
            }
        }
    }

    /// 메시지 하나를 처리하고 응답까지 보냅니다.
    pub async fn process(&self, delivery: Delivery) -> MessageOutcome {
        let outcome = if self.exceeded(delivery.attempt) {
            match self.dead_letter(&delivery).await {
                Ok(()) => MessageOutcome::DeadLettered,
                Err(_) => MessageOutcome::DeadLetterFailed,
            }
        } else {
            self.handle(&delivery.payload).await
        };

        let id = delivery.id.clone();
        let reply = match outcome.disposition() {
            Disposition::Ack => delivery.ack().await,
            Disposition::Nak => delivery.nak().await,
        };
        if let Err(e) = reply {
            warn!(id = %id, outcome = ?outcome, error = %e, "Failed to reply to stream");
        }

        outcome
    }

    fn exceeded(&self, attempt: u32) -> bool {
        self.max_deliveries > 0 && attempt > self.max_deliveries
    }

    async fn dead_letter(&self, delivery: &Delivery) -> std::result::Result<(), DataError> {
        warn!(
            id = %delivery.id,
            attempt = delivery.attempt,
            dead_letter_subject = %self.dead_letter_subject,
            "Delivery limit exceeded, moving to dead-letter subject"
        );
        self.transport
            .publish(&self.dead_letter_subject, &delivery.payload)
            .await
            .map_err(|e| {
                error!(id = %delivery.id, error = %e, "Dead-letter publish failed");
                e
            })
    }

    /// 취소될 때까지 구독을 처리합니다.
    ///
    /// 처리 중인 메시지는 ack/nak까지 마친 뒤 종료하고, 종료 시 구독을 해제합니다.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut subscription = self
            .transport
            .subscribe(&self.subject, &self.durable)
            .await
            .map_err(CollectorError::Transport)?;

        info!(subject = %self.subject, durable = %self.durable, "컨슈머 시작");

        let mut processed: u64 = 0;
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = subscription.next() => received,
            };

            match received {
                Ok(delivery) => {
                    self.process(delivery).await;
                    processed += 1;
                }
                Err(DataError::SubscriptionClosed) => {
                    warn!(subject = %self.subject, "Subscription closed");
                    break;
                }
                Err(e) => {
                    error!(subject = %self.subject, error = %e, "Failed to receive from stream");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_ERROR_DELAY) => {}
                    }
                }
            }
        }

        if let Err(e) = subscription.unsubscribe().await {
            warn!(subject = %self.subject, error = %e, "Failed to unsubscribe");
        }
        info!(subject = %self.subject, processed, "컨슈머 종료");
        Ok(())
    }
}
