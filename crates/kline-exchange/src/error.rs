//! 거래소 에러 타입.

use thiserror::Error;

/// 거래소 조회 에러.
///
/// 호출자 입장에서는 모두 조회 실패(FetchFailed)이며 재시도 대상입니다.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// 네트워크/연결 에러
    #[error("Network error: {0}")]
    Network(String),

    /// 요청 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 2xx가 아닌 HTTP 응답 (본문 해석 불가)
    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// 거래소가 반환한 에러 코드
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    /// 응답 본문 파싱 실패
    #[error("Parse error: {0}")]
    Parse(String),

    /// 필드 수가 모자라거나 값이 잘못된 캔들 행
    #[error("Malformed kline row {index}: {reason}")]
    Malformed { index: usize, reason: String },
}

impl ExchangeError {
    /// 재시도 가능한 에러인지 확인.
    ///
    /// 조회 경로의 모든 실패는 재시도 대상입니다.
    pub fn is_retryable(&self) -> bool {
        true
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout(err.to_string())
        } else if err.is_decode() {
            ExchangeError::Parse(err.to_string())
        } else {
            ExchangeError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::Parse(err.to_string())
    }
}
