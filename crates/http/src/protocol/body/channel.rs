use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::channel::mpsc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use http_body::{Body, Frame, SizeHint};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

type DataItem = Result<PayloadItem, ParseError>;
type RequestItem = Result<Message<(RequestHeader, PayloadSize)>, ParseError>;

/// Decoded body bytes held for a reader that has not asked for them yet.
const MAX_BUFFERED: usize = 64 * 1024;

/// Creates the connection-side sender and the handler-side body for one request.
pub(crate) fn body_channel<S>(payload_stream: &mut S, payload_size: PayloadSize) -> (BodySender<'_, S>, ReqBody)
where
    S: Stream<Item = RequestItem> + Unpin,
{
    let (signal_sender, signal_receiver) = mpsc::channel(1);
    let (data_sender, data_receiver) = mpsc::channel(1);

    // the decoder emits an `Eof` even for bodiless requests, the sender still has to consume it
    let sender = BodySender {
        payload_stream,
        signal_receiver,
        data_sender,
        buffered: VecDeque::new(),
        buffered_size: 0,
        skipped: 0,
        requested: false,
        detached: false,
        eof: false,
        failed: false,
        closed: false,
        next_request: None,
    };
    let body = ReqBody { signal_sender, data_receiver, payload_size, in_flight: false, done: payload_size.is_empty() };
    (sender, body)
}

pub(crate) struct BodyRequest;

/// Connection side of a request body.
///
/// While the handler runs it keeps decoding from the connection, up to [`MAX_BUFFERED`] bytes
/// ahead of the reader, so a peer that goes away is noticed even when nobody reads the body.
pub(crate) struct BodySender<'conn, S> {
    payload_stream: &'conn mut S,
    signal_receiver: mpsc::Receiver<BodyRequest>,
    data_sender: mpsc::Sender<DataItem>,
    buffered: VecDeque<DataItem>,
    buffered_size: usize,
    skipped: usize,
    /// the reader waits for an item
    requested: bool,
    /// the reader is gone
    detached: bool,
    /// the body's `Eof` has been decoded
    eof: bool,
    failed: bool,
    /// nothing more can be read from the connection
    closed: bool,
    next_request: Option<(RequestHeader, PayloadSize)>,
}

impl<S> BodySender<'_, S>
where
    S: Stream<Item = RequestItem> + Unpin,
{
    /// Serves the reader and watches the connection until there is nothing left to do for either.
    ///
    /// `cancel` is cancelled when the peer closes the connection or the body turns out broken.
    /// A request pipelined behind this one stops the watch and is kept for [`Self::next_request`].
    pub(crate) async fn start(&mut self, cancel: &CancellationToken) {
        loop {
            if self.requested && !self.buffered.is_empty() {
                self.deliver().await;
                continue;
            }

            let watching = self.watching();
            if self.detached && !watching {
                return;
            }

            select! {
                biased;
                signal = self.signal_receiver.next(), if !self.detached && !self.requested => match signal {
                    Some(BodyRequest) => self.requested = true,
                    None => self.detach(),
                },
                message = self.payload_stream.next(), if watching => self.receive(message, cancel),
                else => return,
            }
        }
    }

    /// Detaches the reader, then drains whatever is left of the body from the connection.
    pub(crate) async fn skip_data(&mut self) -> Result<(), ParseError> {
        self.detach();

        if self.failed {
            return Err(ParseError::invalid_body("request body is broken"));
        }

        while !self.eof {
            match self.read_data().await? {
                PayloadItem::Chunk(bytes) => self.skipped += bytes.len(),
                PayloadItem::Eof => self.eof = true,
            }
        }

        if self.skipped > 0 {
            info!(size = self.skipped, "skip request body");
        }
        Ok(())
    }

    /// The head of a request decoded while this one was still being handled.
    pub(crate) fn next_request(&mut self) -> Option<(RequestHeader, PayloadSize)> {
        self.next_request.take()
    }

    pub(crate) fn peer_closed(&self) -> bool {
        self.closed
    }

    fn watching(&self) -> bool {
        !self.closed && self.next_request.is_none() && (self.eof || self.buffered_size < MAX_BUFFERED)
    }

    async fn deliver(&mut self) {
        let Some(item) = self.buffered.pop_front() else {
            return;
        };
        if let Ok(PayloadItem::Chunk(bytes)) = &item {
            self.buffered_size -= bytes.len();
        }
        self.requested = false;
        if self.data_sender.send(item).await.is_err() {
            self.detach();
        }
    }

    fn receive(&mut self, message: Option<RequestItem>, cancel: &CancellationToken) {
        match message {
            Some(Ok(Message::Payload(payload_item))) if !self.eof => {
                self.eof = payload_item.is_eof();
                if self.detached {
                    if let PayloadItem::Chunk(bytes) = &payload_item {
                        self.skipped += bytes.len();
                    }
                } else {
                    if let PayloadItem::Chunk(bytes) = &payload_item {
                        self.buffered_size += bytes.len();
                    }
                    self.buffered.push_back(Ok(payload_item));
                }
            }
            Some(Ok(Message::Header(head))) if self.eof => self.next_request = Some(head),
            Some(Ok(_)) => self.fail(ParseError::invalid_body("unexpected message while reading request body"), cancel),
            Some(Err(e)) => self.fail(e, cancel),
            None if self.eof => {
                debug!("connection closed by peer, cancel request");
                self.closed = true;
                cancel.cancel();
            }
            None => self.fail(ParseError::invalid_body("connection closed before request body finished"), cancel),
        }
    }

    fn fail(&mut self, e: ParseError, cancel: &CancellationToken) {
        warn!(cause = %e, "request body broken, cancel request");
        self.failed = true;
        self.closed = true;
        if !self.detached {
            self.buffered.push_back(Err(ParseError::invalid_body(&e)));
        }
        cancel.cancel();
    }

    fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        self.requested = false;
        self.data_sender.close_channel();
        for item in self.buffered.drain(..) {
            if let Ok(PayloadItem::Chunk(bytes)) = item {
                self.skipped += bytes.len();
            }
        }
        self.buffered_size = 0;
    }

    async fn read_data(&mut self) -> Result<PayloadItem, ParseError> {
        match self.payload_stream.next().await {
            Some(Ok(Message::Payload(payload_item))) => Ok(payload_item),
            Some(Ok(Message::Header(_))) => {
                error!("received header while reading request body");
                Err(ParseError::invalid_body("received header while reading request body"))
            }
            Some(Err(e)) => Err(e),
            None => Err(ParseError::invalid_body("connection closed before request body finished")),
        }
    }
}

/// A request body, readable from any task through [`http_body::Body`].
#[derive(Debug)]
pub struct ReqBody {
    signal_sender: mpsc::Sender<BodyRequest>,
    data_receiver: mpsc::Receiver<DataItem>,
    payload_size: PayloadSize,
    in_flight: bool,
    done: bool,
}

impl ReqBody {
    /// A finished body attached to no connection, for requests built outside [`crate::connection`].
    pub fn empty() -> Self {
        let (signal_sender, _) = mpsc::channel(1);
        let (_, data_receiver) = mpsc::channel(1);
        ReqBody { signal_sender, data_receiver, payload_size: PayloadSize::Empty, in_flight: false, done: true }
    }
}

impl Body for ReqBody {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if !this.in_flight {
            match Pin::new(&mut this.signal_sender).poll_ready(cx) {
                Poll::Ready(Ok(())) => {
                    if Pin::new(&mut this.signal_sender).start_send(BodyRequest).is_err() {
                        this.done = true;
                        return Poll::Ready(Some(Err(ParseError::invalid_body("request body detached from connection"))));
                    }
                    this.in_flight = true;
                }
                Poll::Ready(Err(_)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(ParseError::invalid_body("request body detached from connection"))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        match this.data_receiver.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(PayloadItem::Chunk(bytes)))) => {
                this.in_flight = false;
                Poll::Ready(Some(Ok(Frame::data(bytes))))
            }
            Poll::Ready(Some(Ok(PayloadItem::Eof))) => {
                this.in_flight = false;
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(Some(Err(ParseError::invalid_body("request body detached from connection"))))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }

    fn size_hint(&self) -> SizeHint {
        self.payload_size.into()
    }
}

impl From<SizeHint> for PayloadSize {
    fn from(size_hint: SizeHint) -> Self {
        match size_hint.exact() {
            Some(length) => PayloadSize::new_length(length),
            None => PayloadSize::new_chunked(),
        }
    }
}

impl From<PayloadSize> for SizeHint {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(length) => SizeHint::with_exact(length),
            PayloadSize::Chunked => SizeHint::new(),
            PayloadSize::Empty => SizeHint::with_exact(0),
        }
    }
}
