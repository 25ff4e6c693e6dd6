//! HTTP front end: one listener, one task per connection.

pub mod http;
pub mod mjpeg;
pub mod pages;
pub mod router;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::capture::CameraRole;
use crate::context::AppContext;
use http::{HttpError, Response, Status};
use mjpeg::{MjpegSession, StreamEnd};
use router::Route;

pub struct StreamingServer {
    listener: TcpListener,
    context: Arc<AppContext>,
}

impl StreamingServer {
    pub async fn bind(addr: impl ToSocketAddrs, context: Arc<AppContext>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, context })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, spawning a task for each.
    ///
    /// Accept errors (e.g. running out of file descriptors) are logged and
    /// retried after a short pause; they never stop the server.
    pub async fn run(self) {
        if let Ok(addr) = self.local_addr() {
            info!(%addr, "Streaming server listening");
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let context = Arc::clone(&self.context);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, context).await {
                            debug!(%peer, error = %e, "Connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Accept error");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: Arc<AppContext>,
) -> io::Result<()> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
    }
    let (mut reader, writer) = stream.into_split();
    let mut writer = BufWriter::new(writer);

    let request = match timeout(context.request_timeout(), http::read_request(&mut reader)).await {
        Ok(Ok(Some(request))) => request,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(HttpError::Io(e))) => return Err(e),
        Ok(Err(e)) => {
            debug!(%peer, error = %e, "Bad request");
            return respond(&mut writer, Response::error(Status::BadRequest)).await;
        }
        Err(_) => {
            debug!(%peer, "No request received in time, closing");
            return Ok(());
        }
    };

    debug!(%peer, method = %request.method, target = %request.target, "Request");

    if request.method != "GET" {
        return respond(&mut writer, Response::error(Status::NotImplemented)).await;
    }

    match router::resolve(request.path()) {
        Route::Redirect(location) => respond(&mut writer, Response::redirect(location)).await,
        Route::Index => {
            let page = Response::new(Status::Ok).body("text/html", context.index_page());
            respond(&mut writer, page).await
        }
        Route::Stream(role) => {
            stream_camera(writer, peer, role, &context).await;
            Ok(())
        }
        Route::NotFound => respond(&mut writer, Response::error(Status::NotFound)).await,
    }
}

async fn respond<W: AsyncWrite + Unpin>(writer: &mut W, response: Response) -> io::Result<()> {
    response.write_to(writer).await?;
    writer.shutdown().await
}

async fn stream_camera<W: AsyncWrite + Unpin>(
    mut writer: W,
    peer: SocketAddr,
    role: CameraRole,
    context: &AppContext,
) {
    let Some(broadcaster) = context.broadcaster(role) else {
        debug!(%peer, camera = %role, "Stream requested for absent camera");
        if let Err(e) = respond(&mut writer, Response::error(Status::NotFound)).await {
            debug!(%peer, error = %e, "Failed to send 404");
        }
        return;
    };

    info!(%peer, camera = %role, "Added streaming client");
    let mut session = MjpegSession::new(writer, broadcaster.subscribe(), context.stream_timeout());

    match session.run().await {
        StreamEnd::ClientGone(e) => {
            warn!(%peer, camera = %role, "Removed streaming client {}: {}", peer, e);
        }
        StreamEnd::SourceClosed => {
            info!(%peer, camera = %role, "Camera stopped, closing stream");
        }
        StreamEnd::TimedOut => {
            info!(%peer, camera = %role, "Stream timed out, closing");
        }
    }

    debug!(
        %peer,
        camera = %role,
        frames_sent = session.frames_sent(),
        frames_skipped = session.frames_skipped(),
        bytes_sent = session.bytes_sent(),
        "Stream closed"
    );
}
