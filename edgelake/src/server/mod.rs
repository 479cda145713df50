//! Worker threads.
//!
//! Every worker owns a monoio runtime, its own copy of the service chain and its own
//! listener bound to the shared address. Connections never move between threads.
use std::{fmt::Debug, rc::Rc, thread::JoinHandle};

use edgelake_core::{config::Config, context::PeerAddr, store::RecordStore, AnyResult};
use edgelake_services::{hyper::Accept, ingress::DispatcherFactory, invoke::Invoker};
use monoio::{
    net::{TcpListener, TcpStream},
    utils::bind_to_cpu_set,
};
use service_async::{MakeService, Service};

use self::runtime::RuntimeWrapper;
use crate::factory::ingress_factory;

mod runtime;

pub fn spawn_workers<S, I>(
    config: &Config,
    dispatcher: DispatcherFactory<S, I>,
) -> AnyResult<Vec<JoinHandle<()>>>
where
    S: RecordStore + Clone + Send + 'static,
    I: Invoker + Clone + Send + 'static,
{
    let cores = match config.runtime.cpu_affinity {
        true => std::thread::available_parallelism().ok().map(usize::from),
        false => None,
    };

    (0..config.runtime.worker_threads)
        .map(|worker_id| {
            let config = config.clone();
            let dispatcher = dispatcher.clone();
            let handle = std::thread::Builder::new()
                .name(format!("edgelake-worker-{worker_id}"))
                .spawn(move || {
                    if let Some(cores) = cores {
                        let core = worker_id % cores;
                        if let Err(e) = bind_to_cpu_set([core]) {
                            tracing::warn!("bind thread {worker_id} to core {core} failed: {e}");
                        }
                    }
                    let mut runtime = match RuntimeWrapper::build(&config.runtime) {
                        Ok(runtime) => runtime,
                        Err(e) => {
                            tracing::error!("worker {worker_id} failed to start runtime: {e}");
                            return;
                        }
                    };
                    runtime.block_on(async move {
                        if let Err(e) = run_worker(worker_id, config, dispatcher).await {
                            tracing::error!("worker {worker_id} stopped: {e:?}");
                        }
                    });
                })?;
            Ok(handle)
        })
        .collect()
}

async fn run_worker<S, I>(
    worker_id: usize,
    config: Config,
    dispatcher: DispatcherFactory<S, I>,
) -> AnyResult<()>
where
    S: RecordStore + Clone + 'static,
    I: Invoker + Clone + 'static,
{
    let address = config.listener.address;
    let service = ingress_factory(config, dispatcher).make()?;
    let listener = TcpListener::bind(address)?;
    tracing::info!("worker {worker_id} listening on {address}");
    serve(listener, Rc::new(service)).await;
    Ok(())
}

pub async fn serve<Svc>(listener: TcpListener, handler: Rc<Svc>)
where
    Svc: Service<Accept<TcpStream>> + 'static,
    Svc::Error: Debug,
{
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let svc = handler.clone();
                monoio::spawn(async move {
                    match svc.call((stream, PeerAddr(addr))).await {
                        Ok(_) => tracing::debug!("connection from {addr} complete"),
                        Err(e) => tracing::warn!("connection from {addr} failed: {e:?}"),
                    }
                });
            }
            Err(e) => tracing::warn!("accept connection failed: {e:?}"),
        }
    }
}
