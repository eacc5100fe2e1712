//! Stream listener: `/stream` as `multipart/x-mixed-replace` MJPEG.
//!
//! Each connection runs its own capture loop until a capture, encode or write
//! fails. There is no retry inside a connection; the viewer reconnects.

use anyhow::{anyhow, Result};
use std::fmt;
use std::io::{self, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{spawn_listener, ServerHandle};
use crate::encode::{JpegEncoder, STREAM_JPEG_QUALITY};
use crate::frame::{Frame, FrameSource};
use crate::http::{read_request, status_line, write_text_response, ChunkedWriter};

pub const PART_BOUNDARY: &str = "123456789000000000000987654321";
pub const STREAM_CONTENT_TYPE: &str =
    "multipart/x-mixed-replace;boundary=123456789000000000000987654321";
pub const STREAM_BOUNDARY: &str = "\r\n--123456789000000000000987654321\r\n";

pub type SharedCamera = Arc<Mutex<Box<dyn FrameSource>>>;

#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub addr: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8081".to_string(),
        }
    }
}

pub struct StreamServer {
    cfg: StreamConfig,
    camera: SharedCamera,
    encoder: Arc<dyn JpegEncoder>,
}

impl StreamServer {
    pub fn new(cfg: StreamConfig, camera: SharedCamera, encoder: Arc<dyn JpegEncoder>) -> Self {
        Self {
            cfg,
            camera,
            encoder,
        }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let camera = self.camera;
        let encoder = self.encoder;
        spawn_listener("stream", &self.cfg.addr, move |stream| {
            handle_connection(stream, &camera, encoder.as_ref())
        })
    }
}

/// Why a stream loop ended.
#[derive(Debug)]
pub enum StreamError {
    Acquire(anyhow::Error),
    Encode(anyhow::Error),
    Transport(io::Error),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Acquire(err) => write!(f, "camera capture failed: {:#}", err),
            StreamError::Encode(err) => write!(f, "jpeg compression failed: {:#}", err),
            StreamError::Transport(err) => write!(f, "client write failed: {}", err),
        }
    }
}

impl std::error::Error for StreamError {}

/// Result of one stream connection.
#[derive(Debug)]
pub struct StreamEnd {
    pub frames_sent: u64,
    pub error: StreamError,
}

impl StreamEnd {
    /// A client hanging up is the normal end of a stream and yields the frame
    /// count; capture and compression failures come back as errors.
    pub fn into_result(self) -> Result<u64> {
        match self.error {
            StreamError::Transport(_) => Ok(self.frames_sent),
            error => Err(anyhow::Error::new(error)
                .context(format!("stream aborted after {} frames", self.frames_sent))),
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    camera: &Mutex<Box<dyn FrameSource>>,
    encoder: &dyn JpegEncoder,
) -> Result<()> {
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_text_response(&mut stream, 405, "method not allowed")?;
        return Ok(());
    }
    if request.path != "/stream" {
        write_text_response(&mut stream, 404, "not found")?;
        return Ok(());
    }
    let peer = stream.peer_addr()?;
    write_stream_head(&mut stream)?;
    log::info!("stream: {} connected", peer);

    let mut out = ChunkedWriter::new(stream);
    let frames_sent = stream_frames(&mut out, camera, encoder).into_result()?;
    log::info!("stream: {} left after {} frames", peer, frames_sent);
    Ok(())
}

pub fn write_stream_head<W: Write>(out: &mut W) -> io::Result<()> {
    let head = format!(
        "{}\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nAccess-Control-Allow-Origin: *\r\nCache-Control: no-store\r\n\r\n",
        status_line(200),
        STREAM_CONTENT_TYPE
    );
    out.write_all(head.as_bytes())?;
    out.flush()
}

enum Payload {
    Camera(Frame),
    Encoded(Vec<u8>),
}

impl Payload {
    fn bytes(&self) -> &[u8] {
        match self {
            Payload::Camera(frame) => frame.data(),
            Payload::Encoded(buf) => buf,
        }
    }
}

/// Capture, compress if needed, and send parts until something fails.
///
/// At most one camera frame or one encoded buffer is alive per iteration; the
/// camera frame goes back to the source before the next capture, failure
/// paths included.
pub fn stream_frames<W: Write>(
    out: &mut ChunkedWriter<W>,
    camera: &Mutex<Box<dyn FrameSource>>,
    encoder: &dyn JpegEncoder,
) -> StreamEnd {
    let mut frames_sent = 0u64;
    let mut last_sent = Instant::now();
    let end = |frames_sent, error| StreamEnd { frames_sent, error };

    loop {
        let frame = match acquire(camera) {
            Ok(frame) => frame,
            Err(err) => return end(frames_sent, StreamError::Acquire(err)),
        };
        let captured_at = frame.captured_at();

        let payload = if frame.format.is_jpeg() {
            Payload::Camera(frame)
        } else {
            let encoded = encoder.encode_to_jpeg(&frame, STREAM_JPEG_QUALITY);
            release(camera, frame);
            match encoded {
                Ok(buf) => Payload::Encoded(buf),
                Err(err) => return end(frames_sent, StreamError::Encode(err)),
            }
        };

        let len = payload.bytes().len();
        let sent = send_part(out, payload.bytes());
        if let Payload::Camera(frame) = payload {
            release(camera, frame);
        }
        if let Err(err) = sent {
            return end(frames_sent, StreamError::Transport(err));
        }
        frames_sent += 1;

        let timing = FrameTiming::measure(captured_at, &mut last_sent);
        log::debug!(
            "stream: MJPG {}B {}ms ({:.1}fps) latency {}ms",
            len,
            timing.interval.as_millis(),
            timing.fps(),
            timing.latency.as_millis()
        );
    }
}

/// Per-frame timing for the debug log: time since the previous part went out
/// and time from capture to the end of the send.
#[derive(Clone, Copy, Debug)]
struct FrameTiming {
    interval: Duration,
    latency: Duration,
}

impl FrameTiming {
    fn measure(captured_at: Instant, last_sent: &mut Instant) -> Self {
        let now = Instant::now();
        let timing = Self {
            interval: now.duration_since(*last_sent),
            latency: now.duration_since(captured_at),
        };
        *last_sent = now;
        timing
    }

    fn fps(&self) -> f64 {
        1000.0 / self.interval.as_millis().max(1) as f64
    }
}

fn send_part<W: Write>(out: &mut ChunkedWriter<W>, jpeg: &[u8]) -> io::Result<()> {
    let header = format!(
        "Content-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    out.send_chunk(header.as_bytes())?;
    out.send_chunk(jpeg)?;
    out.send_chunk(STREAM_BOUNDARY.as_bytes())
}

fn acquire(camera: &Mutex<Box<dyn FrameSource>>) -> Result<Frame> {
    let mut camera = camera
        .lock()
        .map_err(|_| anyhow!("camera lock poisoned"))?;
    camera.acquire()
}

fn release(camera: &Mutex<Box<dyn FrameSource>>, frame: Frame) {
    match camera.lock() {
        Ok(mut camera) => camera.release(frame),
        Err(_) => log::warn!("stream: camera lock poisoned; dropping frame"),
    }
}
