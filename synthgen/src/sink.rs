//! Sinks that generated records are dispatched into.
//!
//! ## Metrics
//!
//! `requests_sent`: Total number of requests sent
//! `request_ok`: Requests that completed at the transport level, labelled by
//! `status_code`
//! `request_failure`: Requests that failed at the transport level
//! `bytes_written`: Total body bytes handed to the transport
//!
//! The response status is recorded but never validated: a 4xx or 5xx reply is
//! still a completed dispatch.

use async_trait::async_trait;
use bytes::Bytes;
use http::{
    Method, Request, StatusCode, Uri,
    header::{CONTENT_LENGTH, CONTENT_TYPE},
};
use http_body_util::{BodyExt, Full};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use metrics::counter;
use tracing::{debug, error};

/// Errors produced by [`Sink`] implementations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wrapper around [`http::Error`].
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),
    /// The request did not complete at the transport level.
    #[error("Failed to send HTTP request to {uri}: {source}")]
    RequestFailed {
        /// Target URI
        uri: String,
        /// Underlying client error
        #[source]
        source: Box<hyper_util::client::legacy::Error>,
    },
}

/// The outcome of a completed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    /// Status the endpoint answered with, unvalidated.
    pub status: StatusCode,
}

#[async_trait]
/// A destination for serialized records.
pub trait Sink: Send + Sync {
    /// Deliver `body`, returning once the endpoint has answered.
    ///
    /// # Errors
    ///
    /// Returns an error if the body could not be delivered at the transport
    /// level. Callers treat this as fatal.
    async fn dispatch(&self, body: Bytes) -> Result<Dispatched, Error>;
}

/// POSTs JSON bodies to a fixed endpoint.
#[derive(Debug)]
pub struct HttpSink {
    uri: Uri,
    client: Client<HttpConnector, Full<Bytes>>,
    metric_labels: Vec<(String, String)>,
}

impl HttpSink {
    /// Create a new [`HttpSink`] targeting `uri`.
    #[must_use]
    pub fn new(uri: Uri) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(1)
            .retry_canceled_requests(false)
            .build_http();
        let metric_labels = vec![
            ("component".to_string(), "sink".to_string()),
            ("component_name".to_string(), "http".to_string()),
        ];

        Self {
            uri,
            client,
            metric_labels,
        }
    }

    /// The endpoint this sink posts to.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn dispatch(&self, body: Bytes) -> Result<Dispatched, Error> {
        let labels = &self.metric_labels;
        let body_length = body.len();

        let request = Request::builder()
            .method(Method::POST)
            .uri(&self.uri)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LENGTH, body_length)
            .body(Full::new(body))?;

        counter!("requests_sent", labels).increment(1);
        match self.client.request(request).await {
            Ok(response) => {
                counter!("bytes_written", labels).increment(body_length as u64);
                let status = response.status();
                let mut status_labels = labels.clone();
                status_labels.push(("status_code".to_string(), status.as_u16().to_string()));
                counter!("request_ok", &status_labels).increment(1);
                debug!("{uri} answered {status}", uri = self.uri);

                // The body is read only to release the connection.
                if let Err(err) = response.into_body().collect().await {
                    debug!("Discarding unreadable response body: {err}");
                }
                Ok(Dispatched { status })
            }
            Err(source) => {
                error!("Failed to send HTTP request to {uri}: {source}", uri = self.uri);
                let mut error_labels = labels.clone();
                error_labels.push(("error".to_string(), source.to_string()));
                counter!("request_failure", &error_labels).increment(1);
                Err(Error::RequestFailed {
                    uri: self.uri.to_string(),
                    source: Box::new(source),
                })
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::{
        net::SocketAddr,
        sync::{Arc, Mutex},
    };

    use bytes::Bytes;
    use http::{Request, Response, StatusCode, Uri, header::CONTENT_TYPE};
    use http_body_util::{BodyExt, Full};
    use hyper::{body::Incoming, server::conn::http1, service::service_fn};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    use super::{Error, HttpSink, Sink};

    /// A request as seen by [`serve`].
    #[derive(Debug, Clone)]
    pub(crate) struct Received {
        pub(crate) content_type: Option<String>,
        pub(crate) body: Bytes,
    }

    /// Answer every request with `status`, recording what was received.
    pub(crate) async fn serve(status: StatusCode) -> (Uri, Arc<Mutex<Vec<Received>>>) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("could not bind");
        let addr: SocketAddr = listener.local_addr().expect("no local addr");
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&received);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let log = Arc::clone(&log);
                        async move {
                            let content_type = req
                                .headers()
                                .get(CONTENT_TYPE)
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string);
                            let body = req.into_body().collect().await?.to_bytes();
                            log.lock()
                                .expect("poisoned")
                                .push(Received { content_type, body });
                            Ok::<_, hyper::Error>(
                                Response::builder()
                                    .status(status)
                                    .body(Full::new(Bytes::from_static(b"ignored")))
                                    .expect("valid response"),
                            )
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        let uri = format!("http://{addr}/loki/api/v1/push")
            .parse()
            .expect("valid uri");
        (uri, received)
    }

    /// A URI nothing is listening on.
    pub(crate) async fn closed_uri() -> Uri {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("could not bind");
        let addr = listener.local_addr().expect("no local addr");
        drop(listener);
        format!("http://{addr}/loki/api/v1/push")
            .parse()
            .expect("valid uri")
    }

    #[tokio::test]
    async fn posts_json_body() {
        let (uri, received) = serve(StatusCode::NO_CONTENT).await;
        let sink = HttpSink::new(uri);

        let outcome = sink
            .dispatch(Bytes::from_static(br#"{"streams":[]}"#))
            .await
            .expect("dispatch failed");
        assert_eq!(outcome.status, StatusCode::NO_CONTENT);

        let received = received.lock().expect("poisoned");
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].content_type.as_deref(), Some("application/json"));
        assert_eq!(received[0].body, Bytes::from_static(br#"{"streams":[]}"#));
    }

    #[tokio::test]
    async fn error_status_is_not_validated() {
        let (uri, _received) = serve(StatusCode::INTERNAL_SERVER_ERROR).await;
        let sink = HttpSink::new(uri);

        let outcome = sink
            .dispatch(Bytes::from_static(b"{}"))
            .await
            .expect("a 500 reply is still a completed dispatch");
        assert_eq!(outcome.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn transport_failure_is_an_error() {
        let sink = HttpSink::new(closed_uri().await);

        let res = sink.dispatch(Bytes::from_static(b"{}")).await;
        assert!(matches!(res, Err(Error::RequestFailed { .. })));
    }
}
