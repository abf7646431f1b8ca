//! VesperIO - Hardware I/O daemon for a bio-mimetic sonar head
//!
//! Brings up every configured device link, pushes the reset defaults to
//! the sonar board and then runs acquisition jobs back to back until
//! shut down. Acquisition itself lives on the sonar worker thread; the
//! main thread only paces jobs and reports results.

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vesper_io::config::Config;
use vesper_io::emitter::EchoEmitter;
use vesper_io::error::{Error, Result};
use vesper_io::listener::EchoListener;
use vesper_io::pinnae::PinnaeController;
use vesper_io::sonar::{JobRequest, SonarController, SonarWorker};
use vesper_io::transport::SerialTransport;

/// Parse config path from command line arguments.
///
/// Supports:
/// - `vesper-io <path>` (positional)
/// - `vesper-io --config <path>` (flag-based)
/// - `vesper-io -c <path>` (short flag)
///
/// Defaults to `/etc/vesperio.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    // Look for --config or -c flag
    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    // Fall back to first positional argument (if it doesn't start with -)
    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    // Default path
    "/etc/vesperio.toml".to_string()
}

fn open_link(link: &vesper_io::config::LinkConfig) -> Result<SerialTransport> {
    let path = link.resolve()?;
    SerialTransport::open(&path, link.baud_rate)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("VesperIO v0.1.0 starting...");

    let config_path = parse_config_path();
    log::info!("Using config: {}", config_path);
    let config = Config::from_file(&config_path)?;

    // Sonar acquisition board
    let sonar_link = open_link(&config.sonar)?;
    let mut sonar = SonarController::new(Box::new(sonar_link));
    sonar.load_defaults()?;
    let job_bytes = sonar.job_byte_len();
    log::info!("Sonar configured, {} bytes per job", job_bytes);

    // Emitter: verify the link and arm the amplifier
    let emitter_link = open_link(&config.emitter)?;
    let mut emitter = EchoEmitter::new(Box::new(emitter_link));
    emitter.connection_check()?;
    emitter.amp_start()?;
    log::info!("Emitter online");

    // Listener: verify the link; acquisition is driven on demand
    let listener_link = open_link(&config.listener.link)?;
    let mut listener = EchoListener::with_settings(
        Box::new(listener_link),
        config.listener.channel_burst_len,
        config.listener.sample_rate,
        config.listener.left_channel_first,
    );
    listener.connection_check()?;
    log::info!("Listener online");

    // Pinnae: center the ears on startup
    let pinnae_link = open_link(&config.pinnae.link)?;
    let mut pinnae = PinnaeController::new(Box::new(pinnae_link), config.pinnae.motor_count)?;
    pinnae.all_to_zero()?;
    log::info!("Pinnae online ({} motors)", config.pinnae.motor_count);

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);

    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Config(format!("Error setting Ctrl-C handler: {}", e)))?;

    let mut worker = SonarWorker::spawn(sonar);
    log::info!("VesperIO running. Press Ctrl-C to stop.");

    // Main loop: one job in flight at a time, results logged as they land
    let mut jobs_done: u64 = 0;
    worker.submit(JobRequest::Run { do_chirp: true });

    while running.load(Ordering::Relaxed) {
        match worker.results().recv_timeout(Duration::from_millis(100)) {
            Ok(output) => {
                jobs_done += 1;
                log::debug!(
                    "Job {}: {} bytes in {:?}",
                    jobs_done,
                    output.data.len(),
                    output.elapsed
                );
                if jobs_done % 100 == 0 {
                    log::info!("{} acquisition jobs completed", jobs_done);
                }
                if running.load(Ordering::Relaxed) {
                    worker.submit(JobRequest::Run { do_chirp: true });
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                log::error!("Sonar worker stopped unexpectedly");
                break;
            }
        }
    }

    log::info!("Shutting down...");
    worker.shutdown();
    emitter.amp_stop()?;
    pinnae.all_to_zero()?;

    log::info!("VesperIO stopped ({} jobs)", jobs_done);
    Ok(())
}
