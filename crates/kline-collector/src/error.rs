//! 에러 타입 정의.
//!
//! 정상 동작 중의 에러(조회, 발행, 디코딩, 저장)는 모두 그 자리에서 로그/재시도/건너뛰기로
//! 처리되며, 시작 단계의 자원 획득 실패만 프로세스를 종료시킵니다.

use kline_core::CoreError;
use kline_data::DataError;
use kline_exchange::ExchangeError;
use thiserror::Error;

/// Collector 에러 타입
#[derive(Debug, Error)]
pub enum CollectorError {
    /// 재시도 한도까지 거래소 조회 실패
    #[error("could not fetch klines after {attempts} attempts (symbol={symbol}): {source}")]
    FetchFailed {
        symbol: String,
        attempts: u32,
        #[source]
        source: ExchangeError,
    },

    /// 재시도 한도까지 스트림 발행 실패
    #[error("could not publish klines to {subject} after {attempts} attempts: {source}")]
    PublishFailed {
        subject: String,
        attempts: u32,
        #[source]
        source: DataError,
    },

    /// 배치 직렬화/역직렬화 실패
    #[error("codec error: {0}")]
    DecodeFailed(#[from] CoreError),

    /// 저장소 쓰기 실패
    #[error("persist error: {0}")]
    PersistFailed(#[source] DataError),

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Config(String),

    /// 데이터베이스 연결/마이그레이션 에러
    #[error("Database error: {0}")]
    Database(#[source] DataError),

    /// 전송 계층 연결/구독 에러
    #[error("Transport error: {0}")]
    Transport(#[source] DataError),

    /// 거래소 클라이언트 생성 에러
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    /// HTTP 서버 에러
    #[error("HTTP server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, CollectorError>;
