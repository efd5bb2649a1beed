#![forbid(unsafe_code)]

use async_trait::async_trait;

use crate::{
    error::NetResult,
    types::{Request, RequestKind, Response},
};

/// The network engine as seen by the streaming core.
///
/// Implementations own retries: a returned `Err` means the request failed
/// *after* the request's [`RetryPolicy`](crate::RetryPolicy) was exhausted
/// (or the error was not recoverable to begin with).
#[async_trait]
pub trait Net: Send + Sync {
    async fn request(&self, kind: RequestKind, request: Request) -> NetResult<Response>;
}
