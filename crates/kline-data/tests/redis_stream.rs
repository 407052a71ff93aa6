//! Redis Streams 전송 계층 통합 테스트.
//!
//! 실행: `REDIS_URL=redis://127.0.0.1:6379 cargo test -p kline-data -- --ignored`

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use kline_core::StreamConfig;
use kline_data::{RedisStreamTransport, StreamTransport};
use redis::AsyncCommands;

fn config() -> StreamConfig {
    StreamConfig {
        redis_url: std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
        block_ms: 500,
        redelivery_delay_ms: 300,
        ..StreamConfig::default()
    }
}

fn unique_stream() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("kline_test_{}", nanos)
}

async fn drop_stream(url: &str, stream: &str) {
    let client = redis::Client::open(url).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: i64 = conn.del(stream).await.unwrap();
}

#[tokio::test]
#[ignore] // Redis 연결 필요
async fn test_nak_does_not_block_newer_messages() {
    let config = config();
    let stream = unique_stream();
    let transport = RedisStreamTransport::connect(&config).await.unwrap();
    transport.ensure_stream(&stream, "group").await.unwrap();
    let mut sub = transport.subscribe(&stream, "group").await.unwrap();

    transport.publish(&stream, b"broken").await.unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), sub.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.payload, b"broken");
    assert_eq!(first.attempt, 1);
    first.nak().await.unwrap();

    // 실패한 메시지 뒤에 들어온 메시지가 먼저 전달된다
    transport.publish(&stream, b"fresh").await.unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), sub.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.payload, b"fresh");
    assert_eq!(second.attempt, 1);
    second.ack().await.unwrap();

    // 재전달 간격이 지나면 실패한 메시지가 다시 온다
    let third = tokio::time::timeout(Duration::from_secs(5), sub.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(third.payload, b"broken");
    assert_eq!(third.attempt, 2);
    third.nak().await.unwrap();

    // 계속 실패하는 중에도 새 메시지는 흐른다
    transport.publish(&stream, b"later").await.unwrap();
    let fourth = tokio::time::timeout(Duration::from_secs(5), sub.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fourth.payload, b"later");
    fourth.ack().await.unwrap();

    sub.unsubscribe().await.unwrap();
    drop_stream(&config.redis_url, &stream).await;
}
