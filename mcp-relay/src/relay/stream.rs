//! Single-pass upstream body with an idle timeout between chunks

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

/// Upstream response body, relayed chunk by chunk as it arrives.
///
/// Consuming it yields a stream; dropping it (or the stream) drops the
/// upstream response and closes that connection.
pub struct RelayBody {
    inner: BoxStream<'static, io::Result<Bytes>>,
}

impl RelayBody {
    /// Wrap an upstream chunk stream. Each chunk must arrive within `idle`
    /// of the previous one, otherwise the stream ends with `TimedOut`.
    pub fn new<S, E>(upstream: S, idle: Duration, label: String) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let state = Upstream {
            inner: Box::pin(upstream),
            label,
            bytes: 0,
            finished: false,
        };

        let inner = stream::unfold(Some(state), move |state| async move {
            let mut state = state?;
            match tokio::time::timeout(idle, state.inner.next()).await {
                Ok(Some(Ok(chunk))) => {
                    state.bytes += chunk.len() as u64;
                    Some((Ok(chunk), Some(state)))
                }
                Ok(Some(Err(e))) => {
                    warn!("Upstream stream from {} failed: {}", state.label, e);
                    state.finished = true;
                    Some((Err(io::Error::other(e.to_string())), None))
                }
                Ok(None) => {
                    state.finished = true;
                    None
                }
                Err(_) => {
                    warn!(
                        "Upstream stream from {} idle for {:?}, closing",
                        state.label, idle
                    );
                    state.finished = true;
                    Some((
                        Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "upstream stream idle timeout",
                        )),
                        None,
                    ))
                }
            }
        })
        .boxed();

        Self { inner }
    }

    pub fn from_response(response: reqwest::Response, idle: Duration) -> Self {
        let label = response
            .url()
            .host_str()
            .unwrap_or("upstream")
            .to_string();
        Self::new(response.bytes_stream(), idle, label)
    }

    pub fn into_stream(self) -> BoxStream<'static, io::Result<Bytes>> {
        self.inner
    }
}

impl fmt::Debug for RelayBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayBody").finish_non_exhaustive()
    }
}

struct Upstream<S> {
    inner: Pin<Box<S>>,
    label: String,
    bytes: u64,
    finished: bool,
}

impl<S> Drop for Upstream<S> {
    fn drop(&mut self) {
        if self.finished {
            debug!("Relayed {} bytes from {}", self.bytes, self.label);
        } else {
            debug!(
                "Caller went away after {} bytes, closing upstream {}",
                self.bytes, self.label
            );
        }
    }
}
