//! In-process static file listener built on Actix Web.
//!
//! Mirrors what `python -m http.server` offers a developer: files under the
//! root, `index.html` for directories, a generated listing otherwise, and one
//! access-log line per request.
use crate::error::{Error, Result};

use actix_cors::Cors;
use actix_files::Files;
use actix_web::body::MessageBody;
use actix_web::dev::{
    Server, ServerHandle, Service as _, ServiceFactory, ServiceRequest, ServiceResponse,
};
use actix_web::{App, HttpResponse, HttpServer};

use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

// Open keep-alive connections get this long once a graceful stop begins
const SHUTDOWN_TIMEOUT_SECS: u64 = 1;

/// A bound, not yet running, static file server.
pub(crate) struct StaticFileServer {
    pub(crate) handle: ServerHandle,
    pub(crate) server: Server,
    pub(crate) local_addr: SocketAddr,
}

/// Binds `host:port` and builds the server serving `root`.
///
/// Access-log lines are sent on `access_log`; the channel closes once every
/// worker has shut down.
pub(crate) fn bind(
    root: &Path,
    host: IpAddr,
    port: u16,
    workers: usize,
    access_log: mpsc::UnboundedSender<String>,
) -> Result<StaticFileServer> {
    let root = root.canonicalize().map_err(|e| {
        Error::LaunchFailed(format!("cannot serve {}: {}", root.display(), e))
    })?;

    let listener = TcpListener::bind(SocketAddr::new(host, port)).map_err(|e| match e.kind() {
        io::ErrorKind::AddrInUse => Error::PortInUse(port),
        _ => Error::LaunchFailed(format!("cannot listen on {}:{}: {}", host, port, e)),
    })?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;

    let server = HttpServer::new(move || static_app(root.clone(), access_log.clone()))
        .workers(workers)
        .shutdown_timeout(SHUTDOWN_TIMEOUT_SECS)
        .disable_signals()
        .listen(listener)
        .map_err(|e| Error::LaunchFailed(format!("cannot start static file server: {}", e)))?
        .run();

    Ok(StaticFileServer {
        handle: server.handle(),
        server,
        local_addr,
    })
}

/// One worker's app: files under `root` with `index.html` for directories
/// and a listing otherwise, confined to `root`, with CORS and an access log.
fn static_app(
    root: PathBuf,
    access_log: mpsc::UnboundedSender<String>,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    let cors = Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header()
        .max_age(3600);

    let files = Files::new("/", &root)
        .index_file("index.html")
        .show_files_listing()
        .redirect_to_slash_directory()
        .use_hidden_files();

    App::new()
        .wrap_fn(move |req, srv| {
            // Symlinks may point anywhere; only what resolves under root is served
            let refused = escapes_root(&root, req.match_info().unprocessed());
            let outcome = if refused {
                Err(req)
            } else {
                Ok(srv.call(req))
            };
            async move {
                match outcome {
                    Ok(response) => response.await.map(|res| res.map_into_left_body()),
                    Err(req) => {
                        tracing::warn!(path = %req.path(), "Refused path outside document root");
                        let forbidden = HttpResponse::Forbidden()
                            .content_type("text/plain; charset=utf-8")
                            .body("Access denied: path outside root directory");
                        Ok(req.into_response(forbidden).map_into_right_body())
                    }
                }
            }
        })
        .wrap_fn(move |req, srv| {
            let peer = req
                .peer_addr()
                .map(|addr| addr.ip().to_string())
                .unwrap_or_else(|| "-".to_string());
            let request_line = format!("{} {} {:?}", req.method(), req.uri(), req.version());
            let access_log = access_log.clone();
            let response = srv.call(req);
            async move {
                let result = response.await;
                if let Ok(response) = &result {
                    let _ = access_log.send(format!(
                        "{} \"{}\" {}",
                        peer,
                        request_line,
                        response.status().as_u16()
                    ));
                }
                result
            }
        })
        .wrap(cors)
        .service(files)
}

/// Whether `request_path` names an existing entry resolving outside `root`.
fn escapes_root(root: &Path, request_path: &str) -> bool {
    let requested = root.join(request_path.trim_start_matches('/'));
    match requested.canonicalize() {
        Ok(canonical) => !canonical.starts_with(root),
        // Missing entries are left to the file service
        Err(_) => false,
    }
}
