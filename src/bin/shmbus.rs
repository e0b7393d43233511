//! ShmBus runner
//!
//! Builds a bus from the environment (flags win), starts the default
//! modules, monitors the channel and prints final statistics.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use shm_bus::{default_modules, Bus, BusConfig, Result, RunReport, Runtime, RuntimeConfig};

#[derive(Parser, Debug)]
#[command(name = "shmbus")]
#[command(about = "Lock-free record store with event notifications", long_about = None)]
struct Cli {
    /// How long to run, in seconds
    #[arg(short, long, env = "SHMBUS_DURATION_SECS", default_value = "30")]
    duration: u64,

    /// Event channel slots (power of two)
    #[arg(long)]
    channel_capacity: Option<usize>,

    /// Orders table slots
    #[arg(long)]
    orders_capacity: Option<usize>,

    /// Users table slots
    #[arg(long)]
    users_capacity: Option<usize>,

    /// Start readers only
    #[arg(long)]
    writers_disabled: bool,

    /// Shorter writer intervals
    #[arg(long)]
    high_frequency: bool,

    /// Seconds between stats lines
    #[arg(long)]
    monitor_secs: Option<u64>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn bus_config(&self) -> Result<BusConfig> {
        let mut config = BusConfig::from_env()?;
        if let Some(n) = self.channel_capacity {
            config.channel_capacity = n;
        }
        if let Some(n) = self.orders_capacity {
            config.orders_capacity = n;
        }
        if let Some(n) = self.users_capacity {
            config.users_capacity = n;
        }
        config.validate()?;
        Ok(config)
    }

    fn runtime_config(&self) -> Result<RuntimeConfig> {
        let mut config = RuntimeConfig::from_env()?;
        config.writers_disabled |= self.writers_disabled;
        config.high_frequency |= self.high_frequency;
        if let Some(secs) = self.monitor_secs.filter(|s| *s > 0) {
            config.monitor_interval = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    match run(&cli) {
        Ok(report) => {
            print_report(&report);
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(%err, "shmbus failed");
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<RunReport> {
    let bus_config = cli.bus_config()?;
    let runtime_config = cli.runtime_config()?;

    println!("╔══════════════════════════════════════════════════╗");
    println!("║          ShmBus - Record Store + Events          ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!();
    println!("  Channel capacity: {} ({} usable)", bus_config.channel_capacity, bus_config.channel_capacity - 1);
    println!("  Orders slots:     {}", bus_config.orders_capacity);
    println!("  Users slots:      {}", bus_config.users_capacity);
    println!("  Writers:          {}", if runtime_config.writers_disabled { "disabled" } else { "enabled" });
    println!("  High frequency:   {}", runtime_config.high_frequency);
    println!("  Monitor interval: {}s", runtime_config.monitor_interval.as_secs());
    println!("  Duration:         {}s", cli.duration);
    println!();

    let bus = Bus::shared(bus_config)?;
    let modules = default_modules(&bus, &runtime_config);
    let runtime = Runtime::start(bus, modules)?;
    runtime.run_for(Duration::from_secs(cli.duration), &runtime_config);
    runtime.shutdown()
}

fn print_report(report: &RunReport) {
    let secs = report.elapsed.as_secs_f64().max(f64::EPSILON);

    println!();
    println!("┌──────────┬──────────┬──────────┬──────────┬──────────┐");
    println!("│ Module   │  Writes  │  Events  │ Observed │ Empty    │");
    println!("├──────────┼──────────┼──────────┼──────────┼──────────┤");
    for module in &report.modules {
        let writes = module.writer.map_or(0, |w| w.writes);
        let reader = module.reader.unwrap_or_default();
        println!(
            "│ {:<8} │ {:>8} │ {:>8} │ {:>8} │ {:>8} │",
            module.name, writes, reader.events, reader.observed, reader.skipped_empty
        );
    }
    println!("└──────────┴──────────┴──────────┴──────────┴──────────┘");

    let stats = report.stats;
    println!();
    println!("📊 FINAL STATISTICS:");
    println!("   Runtime:    {secs:.1} s");
    println!("   Published:  {} ({:.1}/s)", stats.published, stats.published as f64 / secs);
    println!("   Consumed:   {} ({:.1}/s)", stats.consumed, stats.consumed as f64 / secs);
    println!("   Dropped:    {}", stats.drops);
    println!("   Rejected:   {}", stats.rejected);
    println!("   Unread:     {}", stats.published.saturating_sub(stats.consumed + stats.drops));
}
