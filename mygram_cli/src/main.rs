use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use common::config::Config;
use common::log::tracing_factory::{OutputType, TracingFactory, TracingFactoryOptions};
use server::MygramServer;

#[derive(Parser, Debug)]
#[command(name = "mygram-server")]
#[command(version)]
#[command(about = "N-gram full-text mirror of MySQL tables")]
#[command(long_about = None)]
struct CliArgs {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", default_value = "conf/mygram.toml")]
    config: PathBuf,

    /// Restore this dump before serving
    #[arg(long, value_name = "FILE")]
    load: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    debug: bool,

    /// Log directory; stdout only when omitted
    #[arg(long, value_name = "DIR")]
    log_dir: Option<String>,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
fn install_signal_handlers() {
    extern "C" fn on_signal(_: libc::c_int) {
        SHUTDOWN.store(true, Ordering::Release);
    }
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}

#[cfg(not(unix))]
fn install_signal_handlers() {}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let output = if args.log_dir.is_some() {
        OutputType::LOG
    } else {
        OutputType::STDOUT
    };
    TracingFactory::init_log_with_options(TracingFactoryOptions::new(args.debug, output, args.log_dir.clone()));

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(event = "startup", error = %e, "configuration invalid");
            return ExitCode::from(1);
        }
    };

    let mut mygram = match MygramServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!(event = "startup", error = %e, "server construction failed");
            return ExitCode::from(1);
        }
    };

    if let Some(dump) = &args.load {
        if let Err(e) = mygram.load_dump(&dump.to_string_lossy()) {
            error!(event = "startup", error = %e, dump = %dump.display(), "dump load failed");
            return ExitCode::from(2);
        }
        info!(event = "startup", dump = %dump.display(), "dump restored");
    }

    if let Err(e) = mygram.start() {
        error!(event = "startup", error = %e, "server start failed");
        return ExitCode::from(1);
    }
    info!(event = "startup", "mygram server running");

    install_signal_handlers();
    while !SHUTDOWN.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!(event = "shutdown", "signal received");
    mygram.stop();
    ExitCode::SUCCESS
}
