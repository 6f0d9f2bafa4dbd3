use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use http::HeaderValue;
use http_body::{Body, Frame, SizeHint};
use httppipe_http::protocol::ParseError;
use httppipe_http::protocol::body::ReqBody;
use tracing::{error, info};

use crate::rendezvous::SlotGuard;
use crate::slot::Ack;

/// What a producer offers: its request body and the content type it declared.
pub struct Upload<B = ReqBody> {
    body: B,
    content_type: Option<HeaderValue>,
}

impl<B> Upload<B> {
    pub fn new(body: B, content_type: Option<HeaderValue>) -> Self {
        Self { body, content_type }
    }

    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.content_type.as_ref()
    }
}

/// The consumer's response body: copies the producer's body frame by frame and acknowledges
/// the producer once the last frame went out.
///
/// A failing source is logged and its error passed on, the connection then closes and the
/// consumer sees a truncated transfer. Dropping the body before the end leaves the producer
/// unacknowledged.
pub struct PipeBody<B = ReqBody> {
    source: B,
    ack: Option<Ack>,
    copied: u64,
    guard: SlotGuard<Upload<B>>,
}

impl<B> PipeBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: std::fmt::Display,
{
    pub fn new(upload: Upload<B>, ack: Ack, guard: SlotGuard<Upload<B>>) -> Self {
        Self { source: upload.body, ack: Some(ack), copied: 0, guard }
    }

    fn acknowledge(&mut self) {
        let Some(ack) = self.ack.take() else {
            return;
        };
        match ack.acknowledge() {
            Ok(()) => info!(key = %self.guard.key(), size = self.copied, "transfer complete"),
            Err(e) => error!(key = %self.guard.key(), cause = %e, "ack timeout, producer stopped waiting"),
        }
    }
}

impl<B> Body for PipeBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: std::fmt::Display,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.ack.is_none() {
            return Poll::Ready(None);
        }

        match ready!(Pin::new(&mut this.source).poll_frame(cx)) {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    this.copied += data.len() as u64;
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(e)) => {
                error!(key = %this.guard.key(), size = this.copied, cause = %e, "copy error");
                this.ack = None;
                Poll::Ready(Some(Err(e)))
            }
            None => {
                this.acknowledge();
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.ack.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        self.source.size_hint()
    }
}

/// Response body of [`crate::PipeHandler`]: either nothing or a piped stream.
pub struct ResponseBody {
    inner: Kind,
}

enum Kind {
    Empty,
    Pipe(PipeBody),
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self { inner: Kind::Empty }
    }

    pub fn pipe(body: PipeBody) -> Self {
        Self { inner: Kind::Pipe(body) }
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().inner {
            Kind::Empty => Poll::Ready(None),
            Kind::Pipe(body) => Pin::new(body).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            Kind::Empty => true,
            Kind::Pipe(body) => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            Kind::Empty => SizeHint::with_exact(0),
            Kind::Pipe(body) => body.size_hint(),
        }
    }
}
