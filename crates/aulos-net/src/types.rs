#![forbid(unsafe_code)]

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Headers {
    inner: HashMap<String, String>,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<HashMap<String, String>> for Headers {
    fn from(map: HashMap<String, String>) -> Self {
        Self { inner: map }
    }
}

/// Inclusive byte range for segment requests, open-ended when `end` is `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: Option<u64>,
}

impl RangeSpec {
    #[must_use]
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn to_header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// What a request is for. Purely a telemetry/log tag; transport behavior is
/// identical across kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Manifest,
    Segment,
    License,
    Other,
}

/// Retry policy consumed by [`Net`](crate::Net) implementations.
///
/// `delay_for_attempt(0)` is zero so the first attempt is immediate;
/// subsequent delays double from `base_delay` up to `max_delay`.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// A policy that never retries; used for critical one-shot requests.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponential = self.base_delay * 2_u32.saturating_pow(attempt.saturating_sub(1));
        exponential.min(self.max_delay)
    }
}

/// One logical fetch: URI alternatives tried in order, an optional byte
/// range, and the retry policy the transport applies.
#[derive(Clone, Debug)]
pub struct Request {
    pub uris: Vec<String>,
    pub byte_range: Option<RangeSpec>,
    pub headers: Headers,
    pub retry: RetryPolicy,
}

impl Request {
    #[must_use]
    pub fn new(uris: Vec<String>) -> Self {
        Self {
            uris,
            byte_range: None,
            headers: Headers::new(),
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_byte_range(mut self, range: RangeSpec) -> Self {
        self.byte_range = Some(range);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Completed fetch: payload plus the URI that actually served it.
#[derive(Clone, Debug)]
pub struct Response {
    pub data: Bytes,
    pub uri: String,
    pub headers: Headers,
}
