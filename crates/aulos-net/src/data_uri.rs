#![forbid(unsafe_code)]

//! RFC 2397 `data:` URI resolution.
//!
//! Segments and manifests may be inlined as data URIs; these never touch the
//! network and fail with the critical (non-retryable) error variants.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;

use crate::error::{NetError, NetResult};

/// Decode a full `data:` URI into its payload bytes.
pub fn decode(uri: &str) -> NetResult<Bytes> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| NetError::MalformedDataUri(uri.to_string()))?;

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| NetError::MalformedDataUri(uri.to_string()))?;

    // header = [mediatype][;token]*; only the base64 token changes decoding.
    let mut tokens = header.split(';');
    let _media_type = tokens.next();
    let mut is_base64 = false;
    for token in tokens {
        if token.eq_ignore_ascii_case("base64") {
            is_base64 = true;
        } else if !token.is_empty() && !token.contains('=') {
            // charset=... parameters are fine; a bare unknown token is an
            // encoding we cannot interpret.
            return Err(NetError::UnknownDataUriEncoding(token.to_string()));
        }
    }

    if is_base64 {
        let decoded = STANDARD
            .decode(payload)
            .map_err(|_| NetError::MalformedDataUri(uri.to_string()))?;
        return Ok(Bytes::from(decoded));
    }

    percent_decode(payload).map_or_else(
        || Err(NetError::MalformedDataUri(uri.to_string())),
        |decoded| Ok(Bytes::from(decoded)),
    )
}

fn percent_decode(input: &str) -> Option<Vec<u8>> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Some(out)
}
