//! PepTalk monitor: entry point.
//!
//! ```text
//! peptalk-monitor                       Connect using peptalk-monitor.toml
//! peptalk-monitor --config <path>       Load a custom config TOML
//! peptalk-monitor --host viz-01 --port 6100
//! peptalk-monitor --gen-config          Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use peptalk_monitor::config::MonitorConfig;
use peptalk_monitor::monitor::EngineMonitor;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "peptalk-monitor", about = "Console monitor for a PepTalk engine link")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "peptalk-monitor.toml")]
    config: PathBuf,

    /// Engine host, overrides the config file.
    #[arg(long)]
    host: Option<String>,

    /// Engine control port, overrides the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&MonitorConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = MonitorConfig::load(&cli.config);
    config.override_endpoint(cli.host, cli.port);
    config.engine.validate()?;

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    info!("peptalk-monitor v{}", env!("CARGO_PKG_VERSION"));
    info!("engine: {} (enabled: {})", config.engine, config.engine.enabled);
    info!("reconnect delay: {}s", config.timing.reconnect_delay_secs);

    let monitor = EngineMonitor::new(&config);
    let stop = monitor.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, disconnecting");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    monitor.run(stdin).await;

    Ok(())
}
