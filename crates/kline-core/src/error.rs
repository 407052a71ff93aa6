//! 코어 에러 타입.

use thiserror::Error;

/// 도메인 모델, 코덱, 설정에서 발생하는 에러.
#[derive(Debug, Error)]
pub enum CoreError {
    /// 캔들 필드 검증 실패
    #[error("유효하지 않은 캔들: {0}")]
    InvalidCandle(String),

    /// 배치 직렬화/역직렬화 실패
    #[error("코덱 에러: {0}")]
    Codec(String),

    /// 설정 로드 또는 검증 실패
    #[error("설정 에러: {0}")]
    Config(String),
}

/// 코어 작업을 위한 Result 타입.
pub type CoreResult<T> = Result<T, CoreError>;

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Codec(err.to_string())
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for CoreError {
    fn from(err: validator::ValidationErrors) -> Self {
        CoreError::Config(err.to_string())
    }
}
