//! 캔들 저장소 인터페이스.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kline_core::Candle;

use crate::error::Result;

/// `(symbol, time)` 키 기반 캔들 저장소.
///
/// 같은 키가 이미 있으면 쓰기는 에러 없이 무시됩니다 (덮어쓰지 않음).
/// 여러 태스크에서 동시에 호출해도 안전해야 합니다.
#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// 캔들 하나를 저장하고 실제로 삽입된 행 수(0 또는 1)를 반환합니다.
    async fn insert_one(&self, candle: &Candle) -> Result<u64>;

    /// 캔들 배치를 저장하고 실제로 삽입된 행 수를 반환합니다.
    async fn insert_batch(&self, candles: &[Candle]) -> Result<u64>;

    /// 심볼의 가장 최근 캔들 시각. 저장된 캔들이 없으면 `None`.
    async fn last_candle_time(&self, symbol: &str) -> Result<Option<DateTime<Utc>>>;
}
