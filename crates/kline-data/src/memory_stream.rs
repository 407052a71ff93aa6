//! 메모리 기반 전송 계층.
//!
//! 발행 내역과 ack/nak 결과를 기록합니다. nak된 메시지는 전달 횟수를 올려
//! 같은 subject 큐 끝에 다시 들어갑니다.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{DataError, Result};
use crate::stream::{Acker, Delivery, StreamTransport, Subscription};

/// 발행 기록.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRecord {
    pub subject: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Message {
    id: String,
    subject: String,
    payload: Vec<u8>,
    attempt: u32,
}

#[derive(Debug, Default)]
struct Inner {
    published: Mutex<Vec<PublishRecord>>,
    queues: Mutex<HashMap<String, VecDeque<Message>>>,
    in_flight: Mutex<HashMap<String, Message>>,
    acked: Mutex<Vec<String>>,
    naked: Mutex<Vec<String>>,
    ensured: Mutex<Vec<(String, String)>>,
    fail_next: AtomicUsize,
    next_id: AtomicU64,
    notify: Notify,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// 메모리 전송 계층. 복제본은 같은 상태를 공유합니다.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    inner: Arc<Inner>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 다음 `n`번의 발행을 실패시킵니다.
    pub fn fail_next_publishes(&self, n: usize) {
        self.inner.fail_next.store(n, Ordering::SeqCst);
    }

    /// 성공한 발행 목록.
    pub fn published(&self) -> Vec<PublishRecord> {
        lock(&self.inner.published).clone()
    }

    /// ack된 메시지 ID 목록.
    pub fn acked(&self) -> Vec<String> {
        lock(&self.inner.acked).clone()
    }

    /// nak된 메시지 ID 목록 (nak 횟수만큼 중복).
    pub fn naked(&self) -> Vec<String> {
        lock(&self.inner.naked).clone()
    }

    /// `ensure_stream` 호출 기록.
    pub fn ensured(&self) -> Vec<(String, String)> {
        lock(&self.inner.ensured).clone()
    }

    /// 아직 전달되지 않은 메시지 수.
    pub fn queued(&self, subject: &str) -> usize {
        lock(&self.inner.queues)
            .get(subject)
            .map_or(0, VecDeque::len)
    }

    /// 전달됐지만 ack/nak 되지 않은 메시지 수.
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.in_flight).len()
    }
}

#[async_trait]
impl StreamTransport for InMemoryTransport {
    async fn ensure_stream(&self, subject: &str, durable: &str) -> Result<()> {
        let mut ensured = lock(&self.inner.ensured);
        let key = (subject.to_string(), durable.to_string());
        if !ensured.contains(&key) {
            ensured.push(key);
        }
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<()> {
        let injected = self
            .inner
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(DataError::StreamError("injected publish failure".to_string()));
        }

        lock(&self.inner.published).push(PublishRecord {
            subject: subject.to_string(),
            payload: payload.to_vec(),
        });

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.inner.queues)
            .entry(subject.to_string())
            .or_default()
            .push_back(Message {
                id: format!("{}-0", id),
                subject: subject.to_string(),
                payload: payload.to_vec(),
                attempt: 1,
            });
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, subject: &str, _durable: &str) -> Result<Box<dyn Subscription>> {
        Ok(Box::new(InMemorySubscription {
            inner: self.inner.clone(),
            subject: subject.to_string(),
            closed: false,
        }))
    }
}

#[async_trait]
impl Acker for Inner {
    async fn ack(&self, id: &str) -> Result<()> {
        lock(&self.in_flight).remove(id);
        lock(&self.acked).push(id.to_string());
        Ok(())
    }

    async fn nak(&self, id: &str) -> Result<()> {
        let msg = lock(&self.in_flight).remove(id);
        lock(&self.naked).push(id.to_string());

        if let Some(mut msg) = msg {
            msg.attempt += 1;
            lock(&self.queues)
                .entry(msg.subject.clone())
                .or_default()
                .push_back(msg);
            self.notify.notify_waiters();
        }
        Ok(())
    }
}

struct InMemorySubscription {
    inner: Arc<Inner>,
    subject: String,
    closed: bool,
}

impl InMemorySubscription {
    fn pop(&self) -> Option<Message> {
        lock(&self.inner.queues)
            .get_mut(&self.subject)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Result<Delivery> {
        loop {
            if self.closed {
                return Err(DataError::SubscriptionClosed);
            }

            // 큐 확인 전에 등록해야 그 사이의 notify를 놓치지 않는다
            let notified = self.inner.notify.notified();

            if let Some(msg) = self.pop() {
                lock(&self.inner.in_flight).insert(msg.id.clone(), msg.clone());
                let acker: Arc<dyn Acker> = self.inner.clone();
                return Ok(Delivery::new(
                    msg.id,
                    msg.subject,
                    msg.payload,
                    msg.attempt,
                    acker,
                ));
            }

            notified.await;
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
