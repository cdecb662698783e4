//! SeisRelay - packet relay and sanitation daemon for seismic telemetry

use seis_relay::app::App;
use seis_relay::config::Config;
use seis_relay::error::Result;
use std::env;

const USAGE: &str = "Usage: seis-relay <config.toml>

Relays and sanitizes real-time seismic telemetry packets.

Arguments:
  <config.toml>  Path to the TOML configuration file

Options:
  -h, --help     Print this help";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("{}", USAGE);
        return Ok(());
    }
    let config_path = match args.get(1) {
        Some(path) => path.clone(),
        None => {
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    };

    log::info!("seis-relay v{} starting...", env!("CARGO_PKG_VERSION"));
    log::info!("Using config: {}", config_path);
    let config = Config::load(&config_path)?;

    // Telemetry exporters configured out-of-process pick the service name
    // up from the environment.
    if env::var_os("OTEL_SERVICE_NAME").is_none() {
        env::set_var("OTEL_SERVICE_NAME", &config.application.name);
    }

    let mut app = App::new(config)?;
    app.run()
}
