use std::future::Future;
use std::time::Duration;

use super::error::Result;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Method {
    Get,
    Post,
}

/// A single Bot API call, ready to be put on the wire. `params` become the
/// query string of a GET or the JSON body of a POST.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub params: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Executes HTTP requests for the [`Client`](super::Client).
///
/// Any `Fn(HttpRequest) -> impl Future<Output = Result<HttpResponse>>`
/// closure is a transport, which is how tests stub out the network.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> impl Future<Output = Result<HttpResponse>> + Send;
}

impl<S, F> Transport for S
where
    S: Fn(HttpRequest) -> F + Send + Sync,
    F: Future<Output = Result<HttpResponse>> + Send,
{
    fn send(&self, request: HttpRequest) -> impl Future<Output = Result<HttpResponse>> + Send {
        self(request)
    }
}

/// The production transport, backed by a pooled `reqwest::Client`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// `timeout` bounds every request end to end, so it has to outlast the
    /// long-poll timeout.
    pub fn new(timeout: Duration) -> Result<ReqwestTransport> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(ReqwestTransport { client })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> impl Future<Output = Result<HttpResponse>> + Send {
        async move {
            let builder = match request.method {
                Method::Get => {
                    let builder = self.client.get(&request.url);
                    match &request.params {
                        Some(params) => builder.query(params),
                        None => builder,
                    }
                }
                Method::Post => {
                    let builder = self.client.post(&request.url);
                    match &request.params {
                        Some(params) => builder.json(params),
                        None => builder,
                    }
                }
            };

            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;

            Ok(HttpResponse { status, body })
        }
    }
}
