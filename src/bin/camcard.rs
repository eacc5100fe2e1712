//! camcard - camera robot car daemon
//!
//! 1. Loads configuration (file, env, CLI)
//! 2. Opens the PWM outputs and puts the motors at rest
//! 3. Opens the camera
//! 4. Serves control on the base port and the MJPEG stream on base + 1
//! 5. Stops the motors on Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};

use camcar::config::{CarConfig, PwmBackend};
use camcar::{
    motion, open_camera, ControlConfig, ControlServer, ImageJpegEncoder, MemoryPwm,
    MotionController, PwmOutput, StreamConfig, StreamServer, SysfsPwm,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Camera robot car: MJPEG stream + motor control")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "CAMCAR_CONFIG")]
    config: Option<PathBuf>,

    /// Address both listeners bind to.
    #[arg(long)]
    bind: Option<String>,

    /// Control port; the stream listens on port + 1.
    #[arg(long)]
    port: Option<u16>,

    /// Camera source (stub://rgb, stub://jpeg, or a V4L2 device path).
    #[arg(long)]
    camera: Option<String>,

    /// Drive in memory only, whatever the config says.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = CarConfig::load_from(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        cfg.bind = bind;
    }
    if let Some(port) = args.port {
        cfg.port = port;
    }
    if let Some(camera) = args.camera {
        cfg.camera.source = camera;
    }
    if args.dry_run {
        cfg.pwm.backend = PwmBackend::Memory;
    }
    cfg.validate()?;

    let pwm: Box<dyn PwmOutput> = match cfg.pwm.backend {
        PwmBackend::Memory => {
            log::warn!("pwm backend is memory; motors will not move");
            Box::new(MemoryPwm::new())
        }
        PwmBackend::Sysfs => Box::new(
            SysfsPwm::open(&cfg.pwm.chip, cfg.pwm.channels, cfg.pwm.frequency_hz)
                .context("open sysfs pwm")?,
        ),
    };
    let motion = MotionController::new(pwm, cfg.default_speed)?.into_shared();

    let camera = Arc::new(Mutex::new(
        open_camera(&cfg.camera).context("open camera")?,
    ));

    let control = ControlServer::new(
        ControlConfig {
            addr: cfg.control_addr(),
        },
        motion.clone(),
    )
    .spawn()?;
    log::info!("control listening on http://{}", control.addr);

    let stream = StreamServer::new(
        StreamConfig {
            addr: cfg.stream_addr(),
        },
        camera,
        Arc::new(ImageJpegEncoder),
    )
    .spawn()?;
    log::info!("stream listening on http://{}/stream", stream.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("install Ctrl-C handler")?;

    log::info!("camcard running; Ctrl-C to stop");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping listeners...");
    control.stop()?;
    stream.stop()?;
    motion::lock(&motion)?.stop()?;
    log::info!("motors stopped");

    Ok(())
}
