//! `multipart/x-mixed-replace` JPEG streaming for one client connection.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::error::Elapsed;
use tracing::debug;

use super::http::{Response, Status};
use crate::broadcast::{Frame, FrameSubscriber};

pub const BOUNDARY: &str = "FRAME";

/// Lifecycle of a streaming connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    HeadersSent,
    Streaming,
    Closed,
}

/// Why a stream stopped
#[derive(Debug)]
pub enum StreamEnd {
    /// A write failed: the client went away or the socket broke
    ClientGone(io::Error),
    /// The camera pipeline was torn down
    SourceClosed,
    /// No frame (or no write progress) within the configured stream timeout
    TimedOut,
}

pub fn stream_response() -> Response {
    Response::new(Status::Ok)
        .header("Age", "0")
        .header("Cache-Control", "no-cache, private")
        .header("Pragma", "no-cache")
        .header(
            "Content-Type",
            format!("multipart/x-mixed-replace; boundary={}", BOUNDARY),
        )
}

/// Headers that precede each JPEG in the multipart body
pub fn part_header(len: usize) -> String {
    format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY, len
    )
}

/// Pulls frames from one subscriber and writes them to one client.
///
/// The subscriber is the only thing shared with the producer; all waiting
/// happens on it and on this connection's own writes.
pub struct MjpegSession<W> {
    writer: W,
    subscriber: FrameSubscriber,
    timeout: Option<Duration>,
    state: SessionState,
    frames_sent: u64,
    bytes_sent: u64,
}

impl<W: AsyncWrite + Unpin> MjpegSession<W> {
    pub fn new(writer: W, subscriber: FrameSubscriber, timeout: Option<Duration>) -> Self {
        Self {
            writer,
            subscriber,
            timeout,
            state: SessionState::Connecting,
            frames_sent: 0,
            bytes_sent: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Frames published while this client was still busy with earlier ones
    pub fn frames_skipped(&self) -> u64 {
        self.subscriber.frames_skipped()
    }

    /// Stream until the client disconnects, the source closes, or the
    /// timeout (if any) expires. Always leaves the session `Closed`.
    pub async fn run(&mut self) -> StreamEnd {
        let end = self.stream().await;
        self.state = SessionState::Closed;
        end
    }

    async fn stream(&mut self) -> StreamEnd {
        let head = stream_response();
        match bounded(self.timeout, head.write_to(&mut self.writer)).await {
            Ok(Ok(())) => self.state = SessionState::HeadersSent,
            Ok(Err(e)) => return StreamEnd::ClientGone(e),
            Err(_) => return StreamEnd::TimedOut,
        }

        loop {
            let frame = match bounded(self.timeout, self.subscriber.wait_for_next()).await {
                Ok(Some(frame)) => frame,
                Ok(None) => return StreamEnd::SourceClosed,
                Err(_) => return StreamEnd::TimedOut,
            };

            match bounded(self.timeout, write_part(&mut self.writer, &frame)).await {
                Ok(Ok(written)) => {
                    self.state = SessionState::Streaming;
                    self.frames_sent += 1;
                    self.bytes_sent += written as u64;
                }
                Ok(Err(e)) => return StreamEnd::ClientGone(e),
                Err(_) => return StreamEnd::TimedOut,
            }

            debug!(
                generation = frame.generation(),
                bytes = frame.len(),
                "Frame written"
            );
        }
    }
}

async fn write_part<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> io::Result<usize> {
    let header = part_header(frame.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(frame.data()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await?;
    Ok(header.len() + frame.len() + 2)
}

async fn bounded<F: Future>(limit: Option<Duration>, fut: F) -> Result<F::Output, Elapsed> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await,
        None => Ok(fut.await),
    }
}
