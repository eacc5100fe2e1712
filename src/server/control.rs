//! Control listener: the control page, `/control` commands and `/status`.

use anyhow::Result;
use std::net::TcpStream;

use super::{spawn_listener, ServerHandle};
use crate::command::{self, CommandError};
use crate::http::{read_request, write_response, write_text_response};
use crate::motion::{self, SharedMotion};

/// Static control panel served at `/`.
pub const INDEX_HTML: &str = include_str!("../../assets/index.html");

const CORS_ANY: (&str, &str) = ("Access-Control-Allow-Origin", "*");

#[derive(Clone, Debug)]
pub struct ControlConfig {
    pub addr: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
        }
    }
}

pub struct ControlServer {
    cfg: ControlConfig,
    motion: SharedMotion,
}

impl ControlServer {
    pub fn new(cfg: ControlConfig, motion: SharedMotion) -> Self {
        Self { cfg, motion }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let motion = self.motion;
        spawn_listener("control", &self.cfg.addr, move |stream| {
            handle_connection(stream, &motion)
        })
    }
}

fn handle_connection(mut stream: TcpStream, motion: &SharedMotion) -> Result<()> {
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_text_response(&mut stream, 405, "method not allowed")?;
        return Ok(());
    }
    match request.path.as_str() {
        "/" => {
            write_response(&mut stream, 200, "text/html", &[], INDEX_HTML.as_bytes())?;
        }
        "/control" => match command::handle_query(motion, request.query.as_deref()) {
            Ok(_) => {
                write_response(&mut stream, 200, "text/html", &[CORS_ANY], b"")?;
            }
            Err(err) => {
                match &err {
                    CommandError::Output(_) => log::error!("control: {}", err),
                    _ => log::warn!("control: {}", err),
                }
                let body = if err.status() == 404 {
                    "not found"
                } else {
                    "command failed"
                };
                write_text_response(&mut stream, err.status(), body)?;
            }
        },
        "/status" => {
            let snapshot = motion::lock(motion)?.snapshot();
            let payload = serde_json::to_vec(&snapshot)?;
            write_response(&mut stream, 200, "application/json", &[CORS_ANY], &payload)?;
        }
        _ => {
            write_text_response(&mut stream, 404, "not found")?;
        }
    }
    Ok(())
}
