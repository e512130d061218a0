use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use en50221::report::Reporter;
use en50221::{parse_pmt_section, Cam, CamConfig, CamError};
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Opt {
    /// CA device node
    #[clap(long, default_value = "/dev/dvb/adapter0/ca0")]
    device: PathBuf,

    /// JSON file with stack tunables
    #[clap(long)]
    config: Option<PathBuf>,

    /// Raw PMT section to descramble (repeatable)
    #[clap(long)]
    pmt: Vec<PathBuf>,

    /// Open the CAM menu on this slot
    #[clap(long)]
    menu: Option<u8>,

    /// Refresh interval for the JSON snapshot
    #[clap(long, default_value_t = 2)]
    refresh: u64,

    /// Used when RUST_LOG is not set
    #[clap(long, default_value = "warn")]
    log_level: String,

    /// Hex dump every TPDU (needs trace level)
    #[clap(long, default_value_t = false)]
    dump_tpdu: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&opt.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    let mut config = match &opt.config {
        Some(path) => CamConfig::from_file(path)?,
        None => CamConfig::default(),
    };
    config.dump_tpdu |= opt.dump_tpdu;
    let poll_every = config.poll_interval().max(Duration::from_millis(10));

    let mut cam = open(&opt.device, config)?;
    for path in &opt.pmt {
        let section = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let pmt = parse_pmt_section(&section).with_context(|| format!("parsing {}", path.display()))?;
        info!(program = pmt.program_number, "selecting program");
        cam.set_capmt(pmt);
    }

    let cam = Arc::new(Mutex::new(cam));
    let mut poll_tick = tokio::time::interval(poll_every);
    let mut report_tick = tokio::time::interval(Duration::from_secs(opt.refresh.max(1)));
    let mut menu_pending = opt.menu;

    loop {
        tokio::select! {
            _ = poll_tick.tick() => {
                let cam = Arc::clone(&cam);
                let menu = menu_pending;
                let opened = tokio::task::spawn_blocking(move || -> anyhow::Result<bool> {
                    let mut cam = lock(&cam)?;
                    cam.poll();
                    let Some(slot) = menu else { return Ok(false) };
                    match cam.open_mmi(slot) {
                        Ok(()) => Ok(true),
                        Err(CamError::NoApplicationInfo(_)) => Ok(false),
                        Err(e) => {
                            warn!(slot, "couldn't open menu ({e})");
                            Ok(true)
                        }
                    }
                })
                .await??;
                if opened {
                    menu_pending = None;
                }
            }
            _ = report_tick.tick() => {
                let cam = Arc::clone(&cam);
                tokio::task::spawn_blocking(move || report(&cam)).await??;
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                break;
            }
        }
    }

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        lock(&cam)?.shutdown();
        Ok(())
    })
    .await?
}

fn lock<T>(cam: &Mutex<T>) -> anyhow::Result<MutexGuard<'_, T>> {
    cam.lock().map_err(|_| anyhow::anyhow!("CAM lock poisoned"))
}

/// Prints the status snapshot and any MMI object not yet shown.
fn report(cam: &Mutex<Cam>) -> anyhow::Result<()> {
    let mut cam = lock(cam)?;
    println!("{}", Reporter::generate_json_report(&cam.status()));
    print_mmi(&mut cam);
    Ok(())
}

#[cfg(target_os = "linux")]
fn open(path: &Path, config: CamConfig) -> anyhow::Result<Cam> {
    Cam::open_path(path, config).with_context(|| format!("opening {}", path.display()))
}

#[cfg(not(target_os = "linux"))]
fn open(_path: &Path, _config: CamConfig) -> anyhow::Result<Cam> {
    anyhow::bail!("CA devices are only supported on Linux")
}

fn print_mmi(cam: &mut Cam) {
    let slots = cam.state().slots.len() as u8;
    for slot in 0..slots {
        if !cam.mmi_undisplayed(slot) {
            continue;
        }
        if let Some(object) = cam.get_mmi_object(slot) {
            let json = serde_json::to_string_pretty(object)
                .unwrap_or_else(|_| "{\"error\": \"JSON serialization failed\"}".to_string());
            println!("slot {slot} MMI: {json}");
        }
        cam.acknowledge_mmi(slot);
    }
}
