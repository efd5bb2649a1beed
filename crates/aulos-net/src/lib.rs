#![forbid(unsafe_code)]

//! Network engine seam for the aulos streaming core.
//!
//! The streaming engine never talks to HTTP directly; it hands a [`Request`]
//! (URI alternatives, optional byte range, retry policy) to a [`Net`]
//! implementation and gets back a [`Response`] with the full payload.
//! Retries are applied *inside* the implementation; callers only decide
//! whether a surfaced error is worth another scheduling round.

pub mod client;
pub mod data_uri;
pub mod error;
pub mod traits;
pub mod types;

pub use client::HttpClient;
pub use error::{NetError, NetResult};
pub use traits::Net;
pub use types::{Headers, RangeSpec, Request, RequestKind, Response, RetryPolicy};
