//! The two listeners: control (page + commands) and stream (MJPEG).
//!
//! Both use the same accept loop: a non-blocking listener polled on its own
//! thread until the handle is stopped, with every accepted connection served
//! on a thread of its own.

pub mod control;
pub mod stream;

use anyhow::{anyhow, Result};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub use control::ControlServer;
pub use stream::StreamServer;

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Running listener.
#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    name: &'static str,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting connections. Connections already being served finish
    /// on their own threads.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("{} accept thread panicked", self.name))?;
        }
        Ok(())
    }
}

fn spawn_listener<F>(name: &'static str, addr: &str, handler: F) -> Result<ServerHandle>
where
    F: Fn(TcpStream) -> Result<()> + Send + Sync + 'static,
{
    let configured_addr: SocketAddr = addr
        .parse()
        .map_err(|e| anyhow!("invalid {} address '{}': {}", name, addr, e))?;
    let listener = TcpListener::bind(configured_addr)
        .map_err(|e| anyhow!("bind {} listener on {}: {}", name, configured_addr, e))?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_thread = shutdown.clone();
    let handler = Arc::new(handler);
    let join = std::thread::Builder::new()
        .name(format!("{}-accept", name))
        .spawn(move || {
            if let Err(err) = accept_loop(name, listener, handler, shutdown_thread) {
                log::error!("{} listener stopped: {}", name, err);
            }
        })?;

    Ok(ServerHandle {
        addr,
        name,
        shutdown,
        join: Some(join),
    })
}

fn accept_loop<F>(
    name: &'static str,
    listener: TcpListener,
    handler: Arc<F>,
    shutdown: Arc<AtomicBool>,
) -> Result<()>
where
    F: Fn(TcpStream) -> Result<()> + Send + Sync + 'static,
{
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                let handler = handler.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("{}-conn", name))
                    .spawn(move || {
                        if let Err(err) = (*handler)(stream) {
                            log::warn!("{} request from {} failed: {:#}", name, peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("{} could not serve {}: {}", name, peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
