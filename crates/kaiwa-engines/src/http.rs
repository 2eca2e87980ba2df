//! Shared request plumbing for the engine clients.
//!
//! Every outgoing call goes through [`send_with_guards`]: cancellation is
//! checked before and during the request, the per-call timeout is applied,
//! and non-success statuses become typed errors with a truncated body for
//! logging.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use kaiwa_core::EngineError;

/// Maximum number of error-body bytes carried into an error message.
const ERROR_BODY_LIMIT: usize = 512;

/// Send a request under the cancellation token and per-call timeout, and
/// verify the response status.
pub(crate) async fn send_with_guards(
    request: reqwest::RequestBuilder,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<reqwest::Response, EngineError> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let response = tokio::select! {
        () = cancel.cancelled() => return Err(EngineError::Cancelled),
        sent = tokio::time::timeout(timeout, request.send()) => match sent {
            Err(_) => return Err(EngineError::Timeout(timeout)),
            Ok(Err(e)) => return Err(transport(e)),
            Ok(Ok(response)) => response,
        },
    };

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body = body.chars().take(ERROR_BODY_LIMIT).collect::<String>();
    Err(EngineError::UpstreamStatus {
        status: status.as_u16(),
        body,
    })
}

/// Read the next chunk of a streaming body under the token and an idle
/// timeout. `Ok(None)` means the stream ended.
pub(crate) async fn next_chunk<S>(
    stream: &mut S,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Option<Bytes>, EngineError>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    tokio::select! {
        () = cancel.cancelled() => Err(EngineError::Cancelled),
        chunk = tokio::time::timeout(timeout, stream.next()) => match chunk {
            Err(_) => Err(EngineError::Timeout(timeout)),
            Ok(None) => Ok(None),
            Ok(Some(Err(e))) => Err(transport(e)),
            Ok(Some(Ok(bytes))) => Ok(Some(bytes)),
        },
    }
}

/// Find the next newline in the buffer, returning the position after it.
pub(crate) fn find_newline(buf: &BytesMut) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n').map(|pos| pos + 1)
}

fn transport(e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        // reqwest's own timeout — same handling as ours.
        EngineError::Timeout(Duration::ZERO)
    } else {
        EngineError::Transport(anyhow::Error::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newline_positions_are_one_past_the_byte() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"line one\nrest");
        assert_eq!(find_newline(&buf), Some(9));

        let tail = buf.split_to(9);
        assert_eq!(&tail[..], b"line one\n");
        assert_eq!(find_newline(&buf), None);
    }
}
