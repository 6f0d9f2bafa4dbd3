use std::error::Error;
use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::{Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Empty};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::handler::Handler;
use crate::protocol::body::body_channel;
use crate::protocol::{HttpError, Message, ParseError, PayloadItem, PayloadSize, RequestHeader, ResponseHead, SendError};

type ResponseMessage = Message<(ResponseHead, PayloadSize), Bytes>;

/// Where the next request of a connection comes from.
enum Next {
    Read,
    Pipelined((RequestHeader, PayloadSize)),
    Closed,
}

/// One client connection: decodes requests, runs the handler for each, streams responses back.
///
/// Requests are handled one after another. While the handler runs, the request body is served
/// to it on demand, so a handler may pass the body to another task and keep waiting.
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(), 8 * 1024),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
        }
    }

    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler,
        H::RespBody: Body<Data = Bytes> + Unpin,
        <H::RespBody as Body>::Error: Display,
    {
        let mut pipelined = None;
        loop {
            let message = match pipelined.take() {
                Some(head) => Some(Ok(Message::Header(head))),
                None => self.framed_read.next().await,
            };

            match message {
                Some(Ok(Message::Header((header, payload_size)))) => {
                    match self.do_process(header, payload_size, handler.as_ref()).await? {
                        Next::Read => {}
                        Next::Pipelined(head) => pipelined = Some(head),
                        Next::Closed => {
                            debug!("connection closed by peer while handling request");
                            return Ok(());
                        }
                    }
                }

                Some(Ok(Message::Payload(_))) => {
                    error!("receive request body without request head");
                    self.do_send_response(build_error_response(StatusCode::BAD_REQUEST)).await?;
                    return Err(ParseError::invalid_body("need header while receive body").into());
                }

                Some(Err(e)) => {
                    error!(cause = %e, "can't receive next request");
                    self.do_send_response(build_error_response(StatusCode::BAD_REQUEST)).await?;
                    return Err(e.into());
                }

                None => {
                    debug!("can't read more request, connection closed by peer");
                    return Ok(());
                }
            }
        }
    }

    async fn do_process<H>(&mut self, header: RequestHeader, payload_size: PayloadSize, handler: &H) -> Result<Next, HttpError>
    where
        H: Handler,
        H::RespBody: Body<Data = Bytes> + Unpin,
        <H::RespBody as Body>::Error: Display,
    {
        if header.expects_continue() && !payload_size.is_empty() {
            let writer = self.framed_write.get_mut();
            writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.map_err(SendError::io)?;
            writer.flush().await.map_err(SendError::io)?;
            info!("receive expect request header, sent continue response");
        }

        // cancelled when the client goes away, and in any case once this request is done
        let cancel = CancellationToken::new();
        let _cancel_on_finish = cancel.clone().drop_guard();

        let (mut body_sender, req_body) = body_channel(&mut self.framed_read, payload_size);
        let mut request = header.body(req_body);
        request.extensions_mut().insert(cancel.clone());

        // The handler may wait for its own body to be read by someone else, so the body has to
        // be served, and the connection watched, while the handler is still pending.
        let response_result = {
            let handler_future = handler.call(request);
            let body_future = body_sender.start(&cancel);
            tokio::pin!(handler_future, body_future);

            let mut body_finished = false;
            loop {
                select! {
                    biased;
                    response = &mut handler_future => break response,
                    _ = &mut body_future, if !body_finished => body_finished = true,
                }
            }
        };

        let skip_result = body_sender.skip_data().await;
        let next = match body_sender.next_request() {
            Some(head) => Next::Pipelined(head),
            None if body_sender.peer_closed() => Next::Closed,
            None => Next::Read,
        };
        drop(body_sender);

        self.send_response(response_result).await?;
        skip_result?;
        Ok(next)
    }

    async fn send_response<T, E>(&mut self, response_result: Result<Response<T>, E>) -> Result<(), HttpError>
    where
        T: Body<Data = Bytes> + Unpin,
        T::Error: Display,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        match response_result {
            Ok(response) => self.do_send_response(response).await,
            Err(e) => {
                let e: Box<dyn Error + Send + Sync> = e.into();
                error!(cause = %e, "handle request error");
                self.do_send_response(build_error_response(StatusCode::INTERNAL_SERVER_ERROR)).await
            }
        }
    }

    async fn do_send_response<T>(&mut self, response: Response<T>) -> Result<(), HttpError>
    where
        T: Body<Data = Bytes> + Unpin,
        T::Error: Display,
    {
        let (parts, mut body) = response.into_parts();
        let payload_size = PayloadSize::from(body.size_hint());

        // flushed right away, a streamed body may take a long time to produce its first chunk
        self.framed_write.send(ResponseMessage::Header((ResponseHead::from_parts(parts, ()), payload_size))).await?;

        loop {
            match body.frame().await {
                Some(Ok(frame)) => {
                    let Ok(data) = frame.into_data() else {
                        continue;
                    };
                    self.framed_write.send(ResponseMessage::Payload(PayloadItem::Chunk(data))).await?;
                }
                Some(Err(e)) => return Err(SendError::invalid_body(format!("resolve response body error: {e}")).into()),
                None => {
                    self.framed_write.send(ResponseMessage::Payload(PayloadItem::Eof)).await?;
                    return Ok(());
                }
            }
        }
    }
}

fn build_error_response(status_code: StatusCode) -> Response<Empty<Bytes>> {
    let mut response = Response::new(Empty::new());
    *response.status_mut() = status_code;
    response
}
