//! 滑动窗口限流
//!
//! 记录最近 `max_calls` 次调用的时刻；窗口已满且最早一次还不到 `window` 时，
//! 等到它满 `window` 再发出新调用。限制的是调用频率，不是单次调用时长，也从不返回错误。

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::llm::message::Message;
use crate::llm::LlmClient;

pub struct RateLimitedClient<C> {
    inner: C,
    max_calls: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl<C: LlmClient> RateLimitedClient<C> {
    /// 默认 60 秒内最多 15 次
    pub fn new(inner: C) -> Self {
        Self::with_limits(inner, 15, Duration::from_secs(60))
    }

    pub fn with_limits(inner: C, max_calls: usize, window: Duration) -> Self {
        Self {
            inner,
            max_calls: max_calls.max(1),
            window,
            calls: Mutex::new(VecDeque::with_capacity(max_calls.max(1))),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// 占用一个调用名额；必要时等待
    async fn acquire(&self) {
        let mut calls = self.calls.lock().await;
        if calls.len() >= self.max_calls {
            if let Some(oldest) = calls.front().copied() {
                let ready_at = oldest + self.window;
                if Instant::now() < ready_at {
                    tracing::info!(
                        wait_ms = (ready_at - Instant::now()).as_millis() as u64,
                        max_calls = self.max_calls,
                        "llm rate limit reached, waiting"
                    );
                    tokio::time::sleep_until(ready_at).await;
                }
            }
            while calls.len() >= self.max_calls {
                calls.pop_front();
            }
        }
        calls.push_back(Instant::now());
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for RateLimitedClient<C> {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.acquire().await;
        self.inner.complete(messages).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
