//! The broker URL plus the transport and request hook used to reach it.

use std::sync::Arc;

use crate::infrastructure::transport::{
    HttpRequest, HttpResponse, HttpTransport, RequestInitializer, TransportError,
};

/// Everything needed to issue a request to the remote peer.
///
/// Both loops share one `Endpoint` so that every `GET` and `POST` goes through
/// the same initializer.
pub(crate) struct Endpoint {
    broker_id: Arc<str>,
    url: String,
    transport: Arc<dyn HttpTransport>,
    initializer: Arc<dyn RequestInitializer>,
}

impl Endpoint {
    pub(crate) fn new(
        broker_id: Arc<str>,
        url: String,
        transport: Arc<dyn HttpTransport>,
        initializer: Arc<dyn RequestInitializer>,
    ) -> Self {
        Self {
            broker_id,
            url,
            transport,
            initializer,
        }
    }

    pub(crate) fn broker_id(&self) -> &str {
        &self.broker_id
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    /// Issues one long-poll `GET`.
    pub(crate) async fn get(&self) -> Result<HttpResponse, TransportError> {
        self.execute(HttpRequest::get(self.url.as_str())).await
    }

    /// Issues one `POST` carrying `body`.
    pub(crate) async fn post(&self, body: Vec<u8>) -> Result<HttpResponse, TransportError> {
        self.execute(HttpRequest::post(self.url.as_str(), body)).await
    }

    /// Forces in-flight and future requests to fail.
    pub(crate) fn shutdown_transport(&self) {
        self.transport.shutdown();
    }

    async fn execute(&self, mut request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.initializer.initialize(&mut request);
        self.transport.execute(request).await
    }
}
