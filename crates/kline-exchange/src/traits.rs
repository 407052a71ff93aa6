//! 거래소 trait 정의.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kline_core::{Candle, Timeframe};

use crate::ExchangeError;

/// 거래소 작업을 위한 Result 타입.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// 캔들 조회 인터페이스.
///
/// 반환되는 캔들은 항상 시간 오름차순입니다.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// 거래소 이름 반환.
    fn name(&self) -> &str;

    /// 가장 최근 `limit`개의 캔들을 조회합니다.
    async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>>;

    /// `[start, end]` 구간에서 최대 `limit`개의 캔들을 조회합니다.
    async fn fetch_klines_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>>;

    /// 구간 조회를 지원하는지 여부.
    ///
    /// `false`면 `fetch_klines_range`는 사용하지 말아야 하며, 호출자는 최근 캔들
    /// 조회를 반복하는 방식으로 보완해야 합니다.
    fn supports_range(&self) -> bool {
        true
    }
}
