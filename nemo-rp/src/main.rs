mod cli;
mod eventloop;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use eventloop::Responder;
use nemo_core::channel::Channel;
use nemo_core::config::ReportMode;
use nemo_core::plugin::Plugin;
use nemo_core::report::{BinarySink, CsvSink, NullSink, ReportSink};
use nemo_core::signals::SignalLatch;
use nemo_core::wait::Fatal;
use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Instant;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(cli.verbose, cli.no_color) {
        eprintln!("failed to set up logging: {e:#}");
        return ExitCode::FAILURE;
    }

    tracing::debug!(?cli, "nemo-rp starting");

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(verbosity: u8, no_color: bool) -> Result<()> {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(!no_color)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("{e}"))
}

fn run(cli: Cli) -> Result<()> {
    SignalLatch::install().context("failed to install signal handlers")?;

    let config = cli.into_config();
    let start = Instant::now();

    if config.plugins.len() > 32 {
        anyhow::bail!("at most 32 plugins may be attached, got {}", config.plugins.len());
    }

    let mut channel = if config.ipv6 {
        Channel::open_v6(config.port, config.recv_buf, config.send_buf, config.ttl)
    } else {
        Channel::open_v4(config.port, config.recv_buf, config.send_buf, config.ttl)
    }
    .context("failed to open channel")?;

    let mut plugins = Vec::with_capacity(config.plugins.len());
    for path in &config.plugins {
        // Resolved synchronously, before forking, so a missing `nemo_name`
        // symbol or an unloadable `.so` is fatal to startup here rather than
        // surfacing later as an unexplained child exit.
        let name = nemo_core::plugin::probe_name(path).with_context(|| format!("failed to load plugin `{path}`"))?;
        let plugin = Plugin::spawn(path, name.clone()).with_context(|| format!("failed to spawn plugin `{path}`"))?;
        tracing::info!(path, name, "plugin spawned");
        plugins.push(plugin);
    }

    let stdout = io::stdout();
    let mut sink: Box<dyn ReportSink> = match config.report_mode {
        ReportMode::Csv => Box::new(CsvSink::new(stdout.lock(), true)),
        ReportMode::Binary => Box::new(BinarySink::new(stdout.lock())),
        ReportMode::Quiet => Box::new(NullSink),
    };

    let result = {
        let mut responder = Responder {
            channel: &mut channel,
            config: &config,
            sink: sink.as_mut(),
            plugins: &mut plugins,
            start,
        };
        responder.run()
    };

    io::stdout().flush().ok();

    for plugin in plugins {
        plugin.shutdown();
    }
    channel.close();

    match result {
        Ok(()) => Ok(()),
        Err(Fatal::Interrupt) => {
            tracing::info!("received SIGINT, exiting cleanly");
            Ok(())
        }
        Err(Fatal::Terminate) => {
            tracing::info!("received SIGTERM, exiting cleanly");
            Ok(())
        }
        Err(Fatal::Datagram(e)) => {
            anyhow::bail!("exiting after per-datagram error with --exit-on-error set: {e}");
        }
    }
}
