use std::convert::Infallible;
use std::time::Duration;

use async_trait::async_trait;
use http::header::{ALLOW, CONTENT_TYPE};
use http::{HeaderValue, Method, Request, Response};
use httppipe_http::connection::request_cancellation;
use httppipe_http::handler::Handler;
use httppipe_http::protocol::body::ReqBody;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::PipeError;
use crate::body::{PipeBody, ResponseBody, Upload};
use crate::config::PipeOptions;
use crate::rendezvous::Rendezvous;

/// Maps HTTP requests onto the rendezvous: `PUT` produces, `GET` consumes, the key is the
/// request target's path and query verbatim.
#[derive(Clone)]
pub struct PipeHandler {
    rendezvous: Rendezvous<Upload>,
    options: PipeOptions,
}

impl PipeHandler {
    pub fn new(options: PipeOptions) -> Self {
        Self { rendezvous: Rendezvous::new(), options }
    }

    pub fn rendezvous(&self) -> &Rendezvous<Upload> {
        &self.rendezvous
    }

    async fn produce(&self, key: &str, request: Request<ReqBody>) -> Result<Response<ResponseBody>, PipeError> {
        let cancel = request_cancellation(&request);
        let content_type = request.headers().get(CONTENT_TYPE).cloned();
        let upload = Upload::new(request.into_body(), content_type);

        let wait_cancel = cancelled_or_elapsed(cancel.clone(), self.options.wait_timeout);
        let ack_cancel = cancelled_or_elapsed(cancel, self.options.ack_timeout);
        self.rendezvous.produce(key, upload, wait_cancel, ack_cancel).await?;

        Ok(Response::new(ResponseBody::empty()))
    }

    async fn consume(&self, key: &str, request: Request<ReqBody>) -> Result<Response<ResponseBody>, PipeError> {
        let cancel = request_cancellation(&request);
        drop(request);

        let delivery = self.rendezvous.consume(key, cancelled_or_elapsed(cancel, self.options.wait_timeout)).await?;
        let (upload, ack, guard) = delivery.into_parts();

        let content_type = upload.content_type().cloned().unwrap_or(HeaderValue::from_static("application/octet-stream"));
        let mut response = Response::new(ResponseBody::pipe(PipeBody::new(upload, ack, guard)));
        response.headers_mut().insert(CONTENT_TYPE, content_type);
        Ok(response)
    }
}

impl Default for PipeHandler {
    fn default() -> Self {
        Self::new(PipeOptions::default())
    }
}

#[async_trait]
impl Handler for PipeHandler {
    type RespBody = ResponseBody;
    type Error = Infallible;

    async fn call(&self, request: Request<ReqBody>) -> Result<Response<Self::RespBody>, Self::Error> {
        let method = request.method().clone();
        let key = request.uri().path_and_query().map(|path_and_query| path_and_query.as_str()).unwrap_or("/").to_string();
        info!(%method, %key, "pipe request");

        let result = match method {
            Method::PUT => self.produce(&key, request).await,
            Method::GET => self.consume(&key, request).await,
            _ => Err(PipeError::MethodNotAllowed),
        };

        Ok(result.unwrap_or_else(|e| {
            error!(%method, %key, cause = %e, "pipe request failed");
            error_response(e)
        }))
    }
}

fn error_response(e: PipeError) -> Response<ResponseBody> {
    let mut response = Response::new(ResponseBody::empty());
    *response.status_mut() = e.status_code();
    if e == PipeError::MethodNotAllowed {
        response.headers_mut().insert(ALLOW, HeaderValue::from_static("GET, PUT"));
    }
    response
}

/// Resolves when the request is cancelled or, if set, when `timeout` has elapsed since the
/// first poll.
async fn cancelled_or_elapsed(cancel: CancellationToken, timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => {
            select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {}
            }
        }
        None => cancel.cancelled().await,
    }
}
