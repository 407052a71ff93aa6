//! 캔들 간격(interval) 정의.
//!
//! 거래소 API와 설정 파일은 모두 바이낸스 형식의 간격 문자열("1m", "4h" 등)을
//! 사용하므로, 직렬화도 같은 문자열 형식을 따릅니다.

use chrono::{DateTime, Duration as ChronoDuration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 캔들 타임프레임.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    /// 1분봉
    M1,
    /// 3분봉
    M3,
    /// 5분봉
    M5,
    /// 15분봉
    M15,
    /// 30분봉
    M30,
    /// 1시간봉
    H1,
    /// 2시간봉
    H2,
    /// 4시간봉
    H4,
    /// 6시간봉
    H6,
    /// 8시간봉
    H8,
    /// 12시간봉
    H12,
    /// 일봉
    D1,
    /// 3일봉
    D3,
    /// 주봉
    W1,
    /// 월봉
    MN1,
}

impl Timeframe {
    /// 한 캔들이 차지하는 시간(초).
    pub const fn as_secs(&self) -> u64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M3 => 3 * 60,
            Timeframe::M5 => 5 * 60,
            Timeframe::M15 => 15 * 60,
            Timeframe::M30 => 30 * 60,
            Timeframe::H1 => 60 * 60,
            Timeframe::H2 => 2 * 60 * 60,
            Timeframe::H4 => 4 * 60 * 60,
            Timeframe::H6 => 6 * 60 * 60,
            Timeframe::H8 => 8 * 60 * 60,
            Timeframe::H12 => 12 * 60 * 60,
            Timeframe::D1 => 24 * 60 * 60,
            Timeframe::D3 => 3 * 24 * 60 * 60,
            Timeframe::W1 => 7 * 24 * 60 * 60,
            Timeframe::MN1 => 30 * 24 * 60 * 60, // 근사값
        }
    }

    /// 캔들 간격을 `std::time::Duration`으로 반환합니다.
    pub const fn duration(&self) -> Duration {
        Duration::from_secs(self.as_secs())
    }

    /// 캔들 간격을 chrono 기간으로 반환합니다 (타임스탬프 연산용).
    pub fn as_chrono(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.as_secs() as i64)
    }

    /// `open` 다음 캔들의 시작 시각.
    ///
    /// 월봉은 달력 기준 다음 달 같은 날로 이동합니다 (2월 1일 → 3월 1일).
    pub fn next_open(&self, open: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Timeframe::MN1 => open
                .checked_add_months(Months::new(1))
                .unwrap_or(open + self.as_chrono()),
            _ => open + self.as_chrono(),
        }
    }

    /// 캔들 간격(밀리초).
    pub const fn interval_ms(&self) -> i64 {
        self.as_secs() as i64 * 1000
    }

    /// 바이낸스 간격 문자열.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::D3 => "3d",
            Timeframe::W1 => "1w",
            Timeframe::MN1 => "1M",
        }
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::M1
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tf = match s.trim() {
            "1m" => Timeframe::M1,
            "3m" => Timeframe::M3,
            "5m" => Timeframe::M5,
            "15m" => Timeframe::M15,
            "30m" => Timeframe::M30,
            "1h" => Timeframe::H1,
            "2h" => Timeframe::H2,
            "4h" => Timeframe::H4,
            "6h" => Timeframe::H6,
            "8h" => Timeframe::H8,
            "12h" => Timeframe::H12,
            "1d" => Timeframe::D1,
            "3d" => Timeframe::D3,
            "1w" => Timeframe::W1,
            "1M" => Timeframe::MN1,
            other => return Err(format!("Invalid interval: {}", other)),
        };
        Ok(tf)
    }
}

impl TryFrom<String> for Timeframe {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_ms() {
        assert_eq!(Timeframe::M1.interval_ms(), 60_000);
        assert_eq!(Timeframe::H4.interval_ms(), 4 * 3_600_000);
        assert_eq!(Timeframe::D1.as_chrono(), ChronoDuration::days(1));
    }

    #[test]
    fn test_parse_roundtrip_strings() {
        for s in ["1m", "15m", "1h", "12h", "1d", "1w", "1M"] {
            let tf: Timeframe = s.parse().unwrap();
            assert_eq!(tf.to_string(), s);
        }
        // "1M"(월봉)과 "1m"(분봉)은 대소문자로 구분된다
        assert_ne!("1M".parse::<Timeframe>(), "1m".parse::<Timeframe>());
        assert!("7m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_serde_as_interval_string() {
        let json = serde_json::to_string(&Timeframe::M5).unwrap();
        assert_eq!(json, "\"5m\"");
        let tf: Timeframe = serde_json::from_str("\"1h\"").unwrap();
        assert_eq!(tf, Timeframe::H1);
        assert!(serde_json::from_str::<Timeframe>("\"bogus\"").is_err());
    }

    #[test]
    fn test_next_open_follows_calendar_month() {
        let feb = "2024-02-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let mar = "2024-03-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let apr = "2024-04-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(Timeframe::MN1.next_open(feb), mar);
        assert_eq!(Timeframe::MN1.next_open(mar), apr);
        assert_eq!(Timeframe::H1.next_open(feb), feb + ChronoDuration::hours(1));
    }
}
