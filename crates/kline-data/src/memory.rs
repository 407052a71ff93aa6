//! 메모리 기반 캔들 저장소.
//!
//! DB 없이 파이프라인을 돌려볼 때와 테스트에서 사용합니다. 배치 호출 크기를
//! 기록하고, 다음 N번의 쓰기를 실패시키도록 설정할 수 있습니다.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kline_core::Candle;
use tokio::sync::RwLock;

use crate::error::{DataError, Result};
use crate::repository::CandleRepository;

type Key = (String, DateTime<Utc>);

/// 메모리 저장소.
#[derive(Debug, Default)]
pub struct InMemoryCandleRepository {
    rows: RwLock<BTreeMap<Key, Candle>>,
    batch_calls: Mutex<Vec<usize>>,
    fail_next: AtomicUsize,
}

impl InMemoryCandleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 다음 `n`번의 쓰기 호출을 실패시킵니다.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// 저장 전에 기존 캔들을 채워 넣습니다.
    pub async fn seed(&self, candles: impl IntoIterator<Item = Candle>) {
        let mut rows = self.rows.write().await;
        for c in candles {
            rows.entry((c.symbol.clone(), c.time)).or_insert(c);
        }
    }

    /// 저장된 전체 행 수.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// 심볼의 캔들을 시간순으로 반환합니다.
    pub async fn candles(&self, symbol: &str) -> Vec<Candle> {
        self.rows
            .read()
            .await
            .values()
            .filter(|c| c.symbol == symbol)
            .cloned()
            .collect()
    }

    /// `insert_batch` 호출마다 전달된 배치 크기.
    pub fn batch_calls(&self) -> Vec<usize> {
        self.batch_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn check_failure(&self) -> Result<()> {
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(DataError::InsertError("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CandleRepository for InMemoryCandleRepository {
    async fn insert_one(&self, candle: &Candle) -> Result<u64> {
        self.check_failure()?;

        let mut rows = self.rows.write().await;
        let key = (candle.symbol.clone(), candle.time);
        if rows.contains_key(&key) {
            return Ok(0);
        }
        rows.insert(key, candle.clone());
        Ok(1)
    }

    async fn insert_batch(&self, candles: &[Candle]) -> Result<u64> {
        self.batch_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(candles.len());
        self.check_failure()?;

        let mut rows = self.rows.write().await;
        let mut inserted = 0;
        for c in candles {
            let key = (c.symbol.clone(), c.time);
            if !rows.contains_key(&key) {
                rows.insert(key, c.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn last_candle_time(&self, symbol: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .rows
            .read()
            .await
            .keys()
            .filter(|(s, _)| s == symbol)
            .map(|(_, t)| *t)
            .max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kline_core::datetime_from_ms;

    fn candle(symbol: &str, ms: i64, close: f64) -> Candle {
        Candle {
            time: datetime_from_ms(ms).unwrap(),
            symbol: symbol.to_string(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close,
            volume: 1.0,
            quote_volume: 1.0,
            trades: 1,
            taker_buy_base_volume: 0.5,
            taker_buy_quote_volume: 0.5,
        }
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_noop() {
        let repo = InMemoryCandleRepository::new();
        let first = candle("BTCUSDT", 60_000, 10.0);

        assert_eq!(repo.insert_one(&first).await.unwrap(), 1);
        // 같은 키, 다른 값: 에러도 덮어쓰기도 아님
        assert_eq!(
            repo.insert_one(&candle("BTCUSDT", 60_000, 99.0))
                .await
                .unwrap(),
            0
        );

        assert_eq!(repo.len().await, 1);
        assert_eq!(repo.candles("BTCUSDT").await[0].close, 10.0);
    }

    #[tokio::test]
    async fn test_batch_skips_existing_keys() {
        let repo = InMemoryCandleRepository::new();
        repo.seed([candle("BTCUSDT", 60_000, 1.0)]).await;

        let inserted = repo
            .insert_batch(&[
                candle("BTCUSDT", 60_000, 2.0),
                candle("BTCUSDT", 120_000, 2.0),
                candle("ETHUSDT", 60_000, 2.0),
            ])
            .await
            .unwrap();

        assert_eq!(inserted, 2);
        assert_eq!(repo.batch_calls(), vec![3]);
        assert_eq!(repo.len().await, 3);
    }

    #[tokio::test]
    async fn test_last_candle_time_per_symbol() {
        let repo = InMemoryCandleRepository::new();
        assert!(repo.last_candle_time("BTCUSDT").await.unwrap().is_none());

        repo.seed([
            candle("BTCUSDT", 60_000, 1.0),
            candle("BTCUSDT", 180_000, 1.0),
            candle("ETHUSDT", 600_000, 1.0),
        ])
        .await;

        assert_eq!(
            repo.last_candle_time("BTCUSDT").await.unwrap(),
            datetime_from_ms(180_000)
        );
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let repo = InMemoryCandleRepository::new();
        repo.fail_next_writes(1);

        let c = candle("BTCUSDT", 60_000, 1.0);
        assert!(repo.insert_batch(&[c.clone()]).await.is_err());
        assert_eq!(repo.insert_batch(&[c]).await.unwrap(), 1);
        assert_eq!(repo.batch_calls(), vec![1, 1]);
    }
}
