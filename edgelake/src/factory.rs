//! Service chain served on every connection.
use std::fmt::Debug;

use edgelake_core::{config::Config, store::RecordStore, AnyError};
use edgelake_services::{
    http::EventHandler,
    hyper::{Accept, ConnectionService},
    ingress::DispatcherFactory,
    invoke::Invoker,
};
use monoio::net::TcpStream;
use service_async::{stack::FactoryStack, MakeService, Service};

/// Dispatcher behind the HTTP event bridge, driven by hyper.
pub fn ingress_factory<S, I>(
    config: Config,
    dispatcher: DispatcherFactory<S, I>,
) -> impl MakeService<Service = impl Service<Accept<TcpStream>, Error = impl Debug>, Error = AnyError>
where
    S: RecordStore + Clone + 'static,
    I: Invoker + Clone + 'static,
{
    FactoryStack::new(config)
        .replace(dispatcher)
        .push(EventHandler::layer())
        .push(ConnectionService::layer())
        .into_inner()
}
