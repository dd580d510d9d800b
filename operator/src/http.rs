//! Health/readiness/metrics HTTP endpoint (spec.md §6 "Observability").
//! Plain `hyper` + `hyper-util`, matching the rest of the dependency
//! stack rather than pulling in a web framework for three routes.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use owo_colors::OwoColorize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use storm_common::colors::FG1;

pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new().install_recorder().expect("install global metrics recorder")
}

pub async fn run(port: u16, handle: PrometheusHandle, cancel: CancellationToken) {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("failed to bind health/metrics server to {addr}: {e}");
            return;
        }
    };
    println!("{}", format!("Health/metrics server listening on {addr}").color(FG1));
    storm_common::signal_ready();

    let handle = Arc::new(handle);
    loop {
        let (stream, _) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    eprintln!("health/metrics accept error: {e}");
                    continue;
                }
            },
        };

        let io = TokioIo::new(stream);
        let handle = handle.clone();
        let conn_cancel = cancel.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, handle.clone()));
            let conn = Builder::new(TokioExecutor::new()).serve_connection(io, service);
            tokio::select! {
                _ = conn_cancel.cancelled() => {},
                res = conn => {
                    if let Err(e) = res {
                        eprintln!("health/metrics connection error: {e}");
                    }
                }
            }
        });
    }
}

async fn handle_request(req: Request<Incoming>, handle: Arc<PrometheusHandle>) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/healthz" | "/readyz" => Response::new(Full::new(Bytes::from_static(b"ok"))),
        "/metrics" => Response::new(Full::new(Bytes::from(handle.render()))),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from_static(b"not found")))
            .unwrap(),
    };
    Ok(response)
}
