//! Request and response bodies flowing through the proxy

use crate::client::ConnectionPermit;
use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use pin_project::pin_project;
use relay_core::BoxError;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

/// Largest data frame handed to the caller
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Body of an outbound request
pub type OutboundBody = UnsyncBoxBody<Bytes, BoxError>;

/// Wrap an inbound body so it streams unmodified into the outbound request
pub fn outbound_body<B>(body: B) -> OutboundBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}

/// An outbound request without a body
pub fn empty_body() -> OutboundBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Backend response body, streamed to the caller as it arrives.
///
/// Frames larger than the chunk size are split, trailers are dropped, and a
/// transport error marks the owning engine as failed. Dropping the body
/// before the end (caller went away) drops the backend connection with it,
/// so a half-read connection never goes back to the pool.
#[pin_project]
#[derive(Debug)]
pub struct ResponseBody {
    #[pin]
    inner: Incoming,
    pending: Option<Bytes>,
    chunk_size: usize,
    failed: Arc<AtomicBool>,
    _permit: ConnectionPermit,
}

impl ResponseBody {
    pub(crate) fn new(
        inner: Incoming,
        chunk_size: usize,
        failed: Arc<AtomicBool>,
        permit: ConnectionPermit,
    ) -> Self {
        Self {
            inner,
            pending: None,
            chunk_size: chunk_size.max(1),
            failed,
            _permit: permit,
        }
    }
}

fn next_chunk(data: &mut Bytes, pending: &mut Option<Bytes>, chunk_size: usize) -> Bytes {
    if data.len() > chunk_size {
        let head = data.split_to(chunk_size);
        *pending = Some(std::mem::take(data));
        head
    } else {
        std::mem::take(data)
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        if let Some(mut rest) = this.pending.take() {
            let chunk = next_chunk(&mut rest, this.pending, *this.chunk_size);
            return Poll::Ready(Some(Ok(Frame::data(chunk))));
        }

        loop {
            match ready!(this.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => {
                    // Trailers are hop-by-hop here: the `Trailer` header is never forwarded
                    let Ok(mut data) = frame.into_data() else {
                        continue;
                    };
                    if data.is_empty() {
                        continue;
                    }
                    let chunk = next_chunk(&mut data, this.pending, *this.chunk_size);
                    return Poll::Ready(Some(Ok(Frame::data(chunk))));
                }
                Some(Err(e)) => {
                    this.failed.store(true, Ordering::Release);
                    tracing::warn!(error = %e, "Backend response stream failed mid-body");
                    return Poll::Ready(Some(Err(e.into())));
                }
                None => return Poll::Ready(None),
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.pending.is_none() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        let mut hint = self.inner.size_hint();
        if let Some(rest) = &self.pending {
            let extra = rest.len() as u64;
            if let Some(upper) = hint.upper() {
                hint.set_upper(upper + extra);
            }
            hint.set_lower(hint.lower() + extra);
        }
        hint
    }
}
