//! 재시도 조회/발행 서비스.
//!
//! 오케스트레이터 요청과 실시간 스케줄러가 공유하는 경로입니다. 응답 지연이
//! 중요한 경로이므로 재시도 사이에 대기하지 않고, 고정된 시도 횟수로만 제한합니다.

use std::sync::Arc;

use kline_core::{encode_batch, AppConfig, Candle, Timeframe};
use kline_data::StreamTransport;
use kline_exchange::ExchangeClient;
use tracing::{debug, info, warn};

use crate::error::{CollectorError, Result};

/// 기본 시도 횟수.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// 캔들 조회 및 발행 서비스.
pub struct KlineService {
    exchange: Arc<dyn ExchangeClient>,
    transport: Arc<dyn StreamTransport>,
    subject: String,
    fetch_attempts: u32,
    publish_attempts: u32,
}

impl KlineService {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        transport: Arc<dyn StreamTransport>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            exchange,
            transport,
            subject: subject.into(),
            fetch_attempts: DEFAULT_ATTEMPTS,
            publish_attempts: DEFAULT_ATTEMPTS,
        }
    }

    /// 설정의 subject와 시도 횟수로 생성합니다.
    pub fn from_config(
        exchange: Arc<dyn ExchangeClient>,
        transport: Arc<dyn StreamTransport>,
        config: &AppConfig,
    ) -> Self {
        Self::new(exchange, transport, config.stream.subject.clone())
            .with_attempts(config.sync.fetch_attempts, config.sync.publish_attempts)
    }

    /// 시도 횟수를 바꿉니다. 0은 1로 취급합니다.
    pub fn with_attempts(mut self, fetch: u32, publish: u32) -> Self {
        self.fetch_attempts = fetch.max(1);
        self.publish_attempts = publish.max(1);
        self
    }

    /// 발행 대상 subject.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// 캔들을 조회합니다. 실패하면 최대 시도 횟수까지 즉시 다시 시도합니다.
    ///
    /// 검증에 실패한 캔들은 로그를 남기고 결과에서 제외됩니다.
    pub async fn get_candles(
        &self,
        symbol: &str,
        interval: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let mut attempt = 1;
        loop {
            match self.exchange.fetch_klines(symbol, interval, limit).await {
                Ok(candles) => {
                    debug!(symbol, attempt, count = candles.len(), "Klines fetched");
                    return Ok(retain_valid(symbol, candles));
                }
                Err(e) => {
                    warn!(
                        symbol,
                        attempt,
                        max_attempts = self.fetch_attempts,
                        error = %e,
                        "Kline fetch failed"
                    );
                    if attempt >= self.fetch_attempts {
                        return Err(CollectorError::FetchFailed {
                            symbol: symbol.to_string(),
                            attempts: attempt,
                            source: e,
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// 캔들 배치를 발행합니다. 빈 배치는 전송 없이 성공합니다.
    pub async fn publish_candles(&self, candles: &[Candle]) -> Result<()> {
        if candles.is_empty() {
            debug!(subject = %self.subject, "Empty batch, nothing to publish");
            return Ok(());
        }

        let payload = encode_batch(candles)?;

        let mut attempt = 1;
        loop {
            match self.transport.publish(&self.subject, &payload).await {
                Ok(()) => {
                    debug!(
                        subject = %self.subject,
                        attempt,
                        count = candles.len(),
                        "Klines published"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        subject = %self.subject,
                        attempt,
                        max_attempts = self.publish_attempts,
                        error = %e,
                        "Kline publish failed"
                    );
                    if attempt >= self.publish_attempts {
                        return Err(CollectorError::PublishFailed {
                            subject: self.subject.clone(),
                            attempts: attempt,
                            source: e,
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// 조회 후 발행까지 수행하고 발행한 캔들 수를 반환합니다.
    pub async fn fetch_and_publish(
        &self,
        symbol: &str,
        interval: Timeframe,
        limit: u32,
    ) -> Result<usize> {
        let candles = self.get_candles(symbol, interval, limit).await?;
        self.publish_candles(&candles).await?;
        info!(symbol, interval = %interval, count = candles.len(), "Klines relayed");
        Ok(candles.len())
    }
}

/// 검증을 통과한 캔들만 남깁니다.
///
/// `source`는 로그용 출처 (조회 심볼 또는 스트림 subject).
pub(crate) fn retain_valid(source: &str, candles: Vec<Candle>) -> Vec<Candle> {
    let total = candles.len();
    let valid: Vec<Candle> = candles
        .into_iter()
        .filter(|c| match c.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(source, symbol = %c.symbol, time = %c.time, error = %e, "Dropping invalid kline");
                false
            }
        })
        .collect();

    if valid.len() != total {
        warn!(source, dropped = total - valid.len(), "Invalid klines dropped");
    }
    valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use kline_core::{datetime_from_ms, decode_batch};
    use kline_data::InMemoryTransport;
    use kline_exchange::{ExchangeError, ScriptedExchange};

    fn candle(ms: i64) -> Candle {
        Candle {
            time: datetime_from_ms(ms).unwrap(),
            symbol: "BTCUSDT".to_string(),
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 3.0,
            quote_volume: 4.5,
            trades: 9,
            taker_buy_base_volume: 1.0,
            taker_buy_quote_volume: 1.5,
        }
    }

    fn service(
        exchange: &Arc<ScriptedExchange>,
        transport: &Arc<InMemoryTransport>,
    ) -> KlineService {
        KlineService::new(exchange.clone(), transport.clone(), "infosir_kline")
    }

    fn network_err() -> ExchangeError {
        ExchangeError::Network("connection reset".into())
    }

    #[tokio::test]
    async fn test_get_candles_recovers_within_ceiling() {
        let exchange = Arc::new(ScriptedExchange::new());
        exchange
            .push(Err(network_err()))
            .push(Err(network_err()))
            .push(Ok(vec![candle(60_000)]));
        let transport = Arc::new(InMemoryTransport::new());

        let candles = service(&exchange, &transport)
            .get_candles("BTCUSDT", Timeframe::M1, 5)
            .await
            .unwrap();

        assert_eq!(candles, vec![candle(60_000)]);
        assert_eq!(exchange.call_count(), 3);
    }

    #[tokio::test]
    async fn test_get_candles_exhaustion_reports_attempts() {
        let exchange = Arc::new(ScriptedExchange::new());
        for _ in 0..4 {
            exchange.push(Err(network_err()));
        }
        let transport = Arc::new(InMemoryTransport::new());

        let err = service(&exchange, &transport)
            .get_candles("BTCUSDT", Timeframe::M1, 5)
            .await
            .unwrap_err();

        assert!(matches!(err, CollectorError::FetchFailed { attempts: 3, .. }));
        assert!(err.to_string().contains("after 3 attempts"));
        assert_eq!(exchange.call_count(), 3);
    }

    #[tokio::test]
    async fn test_get_candles_drops_invalid() {
        let mut bad = candle(120_000);
        bad.trades = 0;
        let exchange = Arc::new(ScriptedExchange::new());
        exchange.push(Ok(vec![candle(60_000), bad]));
        let transport = Arc::new(InMemoryTransport::new());

        let candles = service(&exchange, &transport)
            .get_candles("BTCUSDT", Timeframe::M1, 5)
            .await
            .unwrap();
        assert_eq!(candles.len(), 1);
    }

    #[tokio::test]
    async fn test_publish_empty_is_noop() {
        let exchange = Arc::new(ScriptedExchange::new());
        let transport = Arc::new(InMemoryTransport::new());
        transport.fail_next_publishes(10);

        service(&exchange, &transport)
            .publish_candles(&[])
            .await
            .unwrap();
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_publish_retries_then_succeeds() {
        let exchange = Arc::new(ScriptedExchange::new());
        let transport = Arc::new(InMemoryTransport::new());
        transport.fail_next_publishes(2);

        service(&exchange, &transport)
            .publish_candles(&[candle(60_000), candle(120_000)])
            .await
            .unwrap();

        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(decode_batch(&published[0].payload).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_publish_exhaustion_names_subject() {
        let exchange = Arc::new(ScriptedExchange::new());
        let transport = Arc::new(InMemoryTransport::new());
        transport.fail_next_publishes(3);

        let err = service(&exchange, &transport)
            .publish_candles(&[candle(60_000)])
            .await
            .unwrap_err();

        match &err {
            CollectorError::PublishFailed {
                subject, attempts, ..
            } => {
                assert_eq!(subject, "infosir_kline");
                assert_eq!(*attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(transport.published().is_empty());
    }
}
