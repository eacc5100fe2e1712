use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;

use camcar::pwm::Channel;
use camcar::server::control::INDEX_HTML;
use camcar::{ControlConfig, ControlServer, MemoryPwm, MotionController, ServerHandle};

struct TestControl {
    probe: MemoryPwm,
    handle: Option<ServerHandle>,
}

impl TestControl {
    fn new() -> Result<Self> {
        let probe = MemoryPwm::new();
        let motion = MotionController::new(Box::new(probe.clone()), 255)?.into_shared();
        let cfg = ControlConfig {
            addr: "127.0.0.1:0".to_string(),
        };
        let handle = ControlServer::new(cfg, motion).spawn()?;
        Ok(Self {
            probe,
            handle: Some(handle),
        })
    }

    fn get(&self, target: &str) -> Result<(String, String)> {
        let addr = self
            .handle
            .as_ref()
            .expect("test control handle should be initialized")
            .addr;
        let mut stream = TcpStream::connect(addr)?;
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", target);
        stream.write_all(request.as_bytes())?;
        let mut response = String::new();
        stream.read_to_string(&mut response)?;
        let mut parts = response.splitn(2, "\r\n\r\n");
        let headers = parts.next().unwrap_or("").to_string();
        let body = parts.next().unwrap_or("").to_string();
        Ok((headers, body))
    }
}

impl Drop for TestControl {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop().expect("failed to stop control server");
        }
    }
}

#[test]
fn serves_control_page() -> Result<()> {
    let control = TestControl::new()?;
    let (headers, body) = control.get("/")?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert!(headers.contains("Content-Type: text/html"));
    assert_eq!(body, INDEX_HTML);
    Ok(())
}

#[test]
fn accepted_command_returns_empty_body_with_cors() -> Result<()> {
    let control = TestControl::new()?;
    let (headers, body) = control.get("/control?var=car&val=1")?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert!(headers.contains("Access-Control-Allow-Origin: *"));
    assert!(headers.contains("Content-Length: 0"));
    assert!(body.is_empty());
    assert_eq!(control.probe.motor_duties(), [255, 0, 255, 0]);
    Ok(())
}

#[test]
fn missing_pair_is_not_found() -> Result<()> {
    let control = TestControl::new()?;
    for target in ["/control", "/control?var=car", "/control?val=1"] {
        let (headers, _) = control.get(target)?;
        assert!(headers.contains("404 Not Found"), "{}", target);
    }
    Ok(())
}

#[test]
fn unknown_variable_is_server_error() -> Result<()> {
    let control = TestControl::new()?;
    let (headers, _) = control.get("/control?var=turbo&val=1")?;
    assert!(headers.contains("500 Internal Server Error"));
    assert!(!headers.contains("Access-Control-Allow-Origin"));
    Ok(())
}

#[test]
fn speed_then_stop_returns_motors_to_rest() -> Result<()> {
    let control = TestControl::new()?;
    control.get("/control?var=speed&val=400")?;
    control.get("/control?var=car&val=1")?;
    assert_eq!(control.probe.motor_duties(), [255, 0, 255, 0]);

    control.get("/control?var=speed&val=60")?;
    control.get("/control?var=car&val=2")?;
    assert_eq!(control.probe.motor_duties(), [0, 60, 60, 0]);

    control.get("/control?var=car&val=3")?;
    assert_eq!(control.probe.motor_duties(), [0, 0, 0, 0]);
    Ok(())
}

#[test]
fn flash_command_sets_flash_output() -> Result<()> {
    let control = TestControl::new()?;
    control.get("/control?var=flash&val=255")?;
    assert_eq!(control.probe.duty(Channel::Flash), 255);
    assert_eq!(control.probe.motor_duties(), [0, 0, 0, 0]);
    Ok(())
}

#[test]
fn status_reports_motion_snapshot() -> Result<()> {
    let control = TestControl::new()?;
    control.get("/control?var=speed&val=128")?;
    control.get("/control?var=car&val=5")?;

    let (headers, body) = control.get("/status")?;
    assert!(headers.contains("Content-Type: application/json"));
    let status: Value = serde_json::from_str(&body)?;
    assert_eq!(status["state"], "moving");
    assert_eq!(status["speed"], 128);
    assert_eq!(status["duties"], serde_json::json!([0, 128, 0, 128]));
    assert_eq!(status["movement_interval_ms"], 350);
    Ok(())
}

#[test]
fn unknown_path_and_method_are_rejected() -> Result<()> {
    let control = TestControl::new()?;
    let (headers, _) = control.get("/stream")?;
    assert!(headers.contains("404 Not Found"));

    let addr = control.handle.as_ref().expect("handle").addr;
    let mut stream = TcpStream::connect(addr)?;
    stream.write_all(b"POST /control?var=car&val=1 HTTP/1.1\r\n\r\n")?;
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    assert!(response.contains("405 Method Not Allowed"));
    assert_eq!(control.probe.motor_duties(), [0, 0, 0, 0]);
    Ok(())
}
