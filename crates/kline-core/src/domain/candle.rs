//! 캔들(kline) 도메인 모델.
//!
//! 캔들은 거래소 응답으로만 생성되며 생성 이후 변경되지 않습니다.
//! `(symbol, time)` 쌍이 자연 키이며, 같은 키로 두 번 저장하면 두 번째 쓰기는
//! 에러 없이 무시됩니다 (first write wins).

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// 저장된 캔들이 없을 때 백필을 시작하는 기본 시점 (2015-01-01T00:00:00Z).
pub const SYNC_EPOCH_MS: i64 = 1_420_070_400_000;

/// 하나의 OHLCV 관측값.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// 캔들 시작 시각 (UTC)
    pub time: DateTime<Utc>,
    /// 대문자 심볼 (예: "BTCUSDT")
    pub symbol: String,
    /// 시가
    pub open: f64,
    /// 고가
    pub high: f64,
    /// 저가
    pub low: f64,
    /// 종가
    pub close: f64,
    /// 거래량 (기준 자산)
    pub volume: f64,
    /// 거래대금 (호가 자산)
    pub quote_volume: f64,
    /// 체결 건수
    pub trades: i64,
    /// 테이커 매수 거래량
    pub taker_buy_base_volume: f64,
    /// 테이커 매수 거래대금
    pub taker_buy_quote_volume: f64,
}

impl Candle {
    /// 자연 키 `(symbol, time)`.
    pub fn key(&self) -> (&str, DateTime<Utc>) {
        (&self.symbol, self.time)
    }

    /// 시작 시각을 epoch 밀리초로 반환합니다.
    pub fn time_ms(&self) -> i64 {
        self.time.timestamp_millis()
    }

    /// 필드 규칙을 검사합니다.
    ///
    /// OHLC 간의 대소 관계는 검사하지 않습니다. 거래소 데이터를 그대로 신뢰합니다.
    pub fn validate(&self) -> CoreResult<()> {
        if self.symbol.is_empty() {
            return Err(CoreError::InvalidCandle("symbol is empty".into()));
        }
        if self.symbol != self.symbol.to_uppercase() {
            return Err(CoreError::InvalidCandle(format!(
                "symbol must be upper-case: {}",
                self.symbol
            )));
        }

        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
            ("quote_volume", self.quote_volume),
            ("taker_buy_base_volume", self.taker_buy_base_volume),
            ("taker_buy_quote_volume", self.taker_buy_quote_volume),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::InvalidCandle(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        if self.trades < 1 {
            return Err(CoreError::InvalidCandle(format!(
                "trades must be positive, got {}",
                self.trades
            )));
        }

        Ok(())
    }
}

/// epoch 밀리초를 UTC 시각으로 변환합니다. 범위를 벗어나면 `None`.
pub fn datetime_from_ms(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Candle {
        Candle {
            time: datetime_from_ms(1_000_000).unwrap(),
            symbol: "BTCUSDT".to_string(),
            open: 100.0,
            high: 110.0,
            low: 95.0,
            close: 105.0,
            volume: 12.5,
            quote_volume: 1300.0,
            trades: 42,
            taker_buy_base_volume: 6.0,
            taker_buy_quote_volume: 640.0,
        }
    }

    #[test]
    fn test_valid_candle() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_zero_values_accepted_except_trades() {
        let mut c = sample();
        c.open = 0.0;
        c.volume = 0.0;
        c.taker_buy_quote_volume = 0.0;
        assert!(c.validate().is_ok());

        c.trades = 0;
        assert!(matches!(c.validate(), Err(CoreError::InvalidCandle(_))));
    }

    #[test]
    fn test_rejects_bad_symbol() {
        let mut c = sample();
        c.symbol = String::new();
        assert!(c.validate().is_err());

        c.symbol = "btcusdt".to_string();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_and_nan() {
        let mut c = sample();
        c.low = -1.0;
        assert!(c.validate().is_err());

        let mut c = sample();
        c.quote_volume = f64::NAN;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_ohlc_order_not_enforced() {
        let mut c = sample();
        c.high = 1.0;
        c.low = 500.0;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_key_and_epoch() {
        let c = sample();
        assert_eq!(c.key(), ("BTCUSDT", c.time));
        assert_eq!(c.time_ms(), 1_000_000);
        assert_eq!(
            datetime_from_ms(SYNC_EPOCH_MS).unwrap().to_rfc3339(),
            "2015-01-01T00:00:00+00:00"
        );
    }
}
