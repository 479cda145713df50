//! HTTP/1 connection driver.
//!
//! Each accepted stream is served by hyper on the current monoio thread. Requests are
//! handed, together with the peer address, to a handler chain implementing
//! [`HttpHandler`].
use std::{error::Error, future::Future, pin::Pin, rc::Rc};

use edgelake_core::{config::ListenerConfig, context::PeerAddr, http::HttpHandler};
use http::{Request, Response};
use hyper::body::{Body, Incoming};
use hyper_util::server::conn::auto::Builder;
use monoio::io::{
    poll_io::{AsyncRead, AsyncWrite},
    IntoPollIo,
};
pub use monoio_compat::hyper::{MonoioExecutor, MonoioIo};
use service_async::{
    layer::{layer_fn, FactoryLayer},
    MakeService, Param, Service,
};

/// An accepted stream and the address it came from.
pub type Accept<Stream> = (Stream, PeerAddr);

type BoxError = Box<dyn Error + Send + Sync>;

pub struct ConnectionService<H> {
    handler_chain: Rc<H>,
    builder: Builder<MonoioExecutor>,
}

impl<H> ConnectionService<H> {
    pub fn new(handler_chain: H, builder: Builder<MonoioExecutor>) -> Self {
        Self {
            handler_chain: Rc::new(handler_chain),
            builder,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConnectionError {
    #[error("io error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0:?}")]
    Http(#[from] BoxError),
}

impl<H, Stream> Service<Accept<Stream>> for ConnectionService<H>
where
    Stream: IntoPollIo,
    Stream::PollIo: AsyncRead + AsyncWrite + Unpin + 'static,
    H: HttpHandler<PeerAddr, Incoming> + 'static,
    H::Error: Into<BoxError>,
    H::Body: Body + 'static,
    <H::Body as Body>::Error: Into<BoxError>,
{
    type Response = ();
    type Error = ConnectionError;

    async fn call(&self, (io, peer): Accept<Stream>) -> Result<Self::Response, Self::Error> {
        tracing::trace!("serving connection from {}", peer.0);
        let io = MonoioIo::new(io.into_poll_io()?);
        let service = PerRequest {
            peer,
            handler_chain: self.handler_chain.clone(),
        };
        self.builder
            .serve_connection(io, service)
            .await
            .map_err(ConnectionError::Http)
    }
}

/// Hyper service bound to one connection.
struct PerRequest<H> {
    peer: PeerAddr,
    handler_chain: Rc<H>,
}

type ResponseFuture<B, E> = Pin<Box<dyn Future<Output = Result<Response<B>, E>>>>;

impl<H> hyper::service::Service<Request<Incoming>> for PerRequest<H>
where
    H: HttpHandler<PeerAddr, Incoming> + 'static,
{
    type Response = Response<H::Body>;
    type Error = H::Error;
    type Future = ResponseFuture<H::Body, H::Error>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let chain = self.handler_chain.clone();
        let peer = self.peer;
        Box::pin(async move { chain.handle(req, peer).await.map(|(response, _)| response) })
    }
}

pub struct ConnectionFactory<F> {
    factory_chain: F,
    builder: Builder<MonoioExecutor>,
}

impl<F: MakeService> MakeService for ConnectionFactory<F> {
    type Service = ConnectionService<F::Service>;
    type Error = F::Error;

    fn make_via_ref(&self, old: Option<&Self::Service>) -> Result<Self::Service, Self::Error> {
        let handler_chain = self
            .factory_chain
            .make_via_ref(old.map(|o| o.handler_chain.as_ref()))?;
        Ok(ConnectionService::new(handler_chain, self.builder.clone()))
    }
}

impl<F> ConnectionService<F> {
    /// Serves HTTP/1 with the keep-alive policy of the listener.
    pub fn layer<C>() -> impl FactoryLayer<C, F, Factory = ConnectionFactory<F>>
    where
        C: Param<ListenerConfig>,
    {
        layer_fn(|c: &C, inner| {
            let listener = c.param();
            let mut builder = Builder::new(MonoioExecutor);
            builder.http1().keep_alive(listener.keep_alive);
            ConnectionFactory {
                factory_chain: inner,
                builder: builder.http1_only(),
            }
        })
    }
}
