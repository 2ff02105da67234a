use std::future::Future;
use std::io;
use std::process;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use tokio::sync::oneshot;

use megaphone_relay::capture::{
    select_interface, CapturePipeline, LiveCapture, NetworkProbe, PcapProbe, PipelineState,
};
use megaphone_relay::config::{Config, DEFAULT_CONFIG_PATH};
use megaphone_relay::dispatch::{Dispatcher, LogSink, SuppressedPhrases, WebhookSink};
use megaphone_relay::utils::{format_bytes, format_duration};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "megaphone-relay")]
#[command(about = "Relays in-game megaphone broadcasts to a Discord webhook")]
struct Cli {
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, help = "Configuration file path")]
    config: String,

    #[arg(short, long, help = "Network interface to capture on (skips auto-selection)")]
    interface: Option<String>,

    #[arg(short, long, help = "Enable debug logging")]
    debug: bool,

    #[arg(long, help = "List capture interfaces and exit")]
    list_interfaces: bool,

    #[arg(long, help = "Log formatted messages instead of posting them")]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    if cli.list_interfaces {
        match PcapProbe.interfaces() {
            Ok(interfaces) if interfaces.is_empty() => println!("No capture interfaces found"),
            Ok(interfaces) => {
                for interface in interfaces {
                    println!("{}", interface);
                }
            }
            Err(e) => {
                error!("{}", e);
                process::exit(1);
            }
        }
        return;
    }

    let config = match Config::load_from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(cli, config).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let started = Instant::now();
    let mut state = PipelineState::Idle;
    info!("Loaded configuration from {}", cli.config);
    info!("Webhook host: {}", config.webhook_host());

    let configured = cli.interface.clone().or_else(|| config.capture.interface.clone());
    let interface = match configured {
        Some(name) => {
            info!("Using configured interface: {}", name);
            name
        }
        None => {
            let timeout = config.capture.probe_timeout();
            let selected = tokio::task::spawn_blocking(move || select_interface(timeout))
                .await
                .context("Interface selection task failed")?;
            match selected {
                Ok(name) => name,
                Err(e) => {
                    state.advance(PipelineState::Fatal);
                    return Err(e.into());
                }
            }
        }
    };
    state.advance(PipelineState::InterfaceSelected);

    let capture = match LiveCapture::open(&interface, &config.capture) {
        Ok(capture) => capture,
        Err(e) => {
            state.advance(PipelineState::Fatal);
            return Err(anyhow::Error::new(e).context("Cannot start packet capture"));
        }
    };
    state.advance(PipelineState::CaptureOpen);

    let policy = SuppressedPhrases::new(config.dispatch.suppressed_phrases.clone());
    let capacity = config.dispatch.queue_capacity;
    let dispatcher = if cli.dry_run {
        info!("Dry run: messages are logged, not posted");
        Dispatcher::spawn(LogSink, policy, capacity)
    } else {
        let sink = WebhookSink::new(config.web_hook.clone(), config.dispatch.request_timeout())
            .context("Failed to build webhook client")?;
        Dispatcher::spawn(sink, policy, capacity)
    };

    let mut pipeline = CapturePipeline::new(capture, config.capture.extractor.strategy());
    let stop = pipeline.stop_handle();
    let mut sender = dispatcher.sender();
    let (done_tx, mut done_rx) = oneshot::channel();

    thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || {
            let result = pipeline.run(&mut sender);
            let capture = pipeline.source_mut();
            if let Some((received, dropped)) = capture.kernel_stats() {
                info!(
                    "libpcap on {}: {} received, {} dropped",
                    capture.interface(),
                    received,
                    dropped
                );
            }
            let capture_stats = capture.stats().clone();
            let _ = done_tx.send((result, capture_stats));
        })
        .context("Failed to start capture thread")?;

    info!("Listening for megaphone broadcasts, press Ctrl-C to stop");

    // the capture thread blocks on packet arrival, so on Ctrl-C it is left behind
    let outcome = wait_for_capture(&mut done_rx, tokio::signal::ctrl_c()).await;
    if outcome.is_none() {
        info!("Ctrl-C received, shutting down");
        stop.store(true, Ordering::Relaxed);
    }

    let fatal = match outcome {
        Some(Ok((Ok(stats), capture_stats))) => {
            info!(
                "Capture finished: {} frames ({}), {} messages forwarded",
                capture_stats.frames_captured,
                format_bytes(capture_stats.bytes_captured),
                stats.forwarded
            );
            None
        }
        Some(Ok((Err(e), _))) => Some(anyhow::Error::new(e).context("Capture failed")),
        Some(Err(_)) => Some(anyhow!("Capture thread exited unexpectedly")),
        None => None,
    };

    match tokio::time::timeout(SHUTDOWN_GRACE, dispatcher.close()).await {
        Ok(stats) => info!(
            "Dispatcher drained: {} delivered, {} suppressed, {} failed",
            stats.delivered, stats.suppressed, stats.failed
        ),
        Err(_) => warn!(
            "Dispatcher did not drain within {}s, exiting anyway",
            SHUTDOWN_GRACE.as_secs()
        ),
    }
    info!("Ran for {}", format_duration(started.elapsed().as_secs()));

    match fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Waits for the capture thread's result or a shutdown signal, returning `None`
/// on shutdown. A signal listener that fails is logged and then ignored.
async fn wait_for_capture<T>(
    done: &mut oneshot::Receiver<T>,
    shutdown: impl Future<Output = io::Result<()>>,
) -> Option<Result<T, oneshot::error::RecvError>> {
    tokio::pin!(shutdown);
    let mut listening = true;
    loop {
        tokio::select! {
            finished = &mut *done => return Some(finished),
            signal = &mut shutdown, if listening => match signal {
                Ok(()) => return None,
                Err(e) => {
                    warn!("Cannot listen for Ctrl-C ({}), running until capture ends", e);
                    listening = false;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_stops_waiting() {
        let (_done_tx, mut done_rx) = oneshot::channel::<u32>();
        let outcome = wait_for_capture(&mut done_rx, async { Ok(()) }).await;
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_failed_signal_listener_keeps_waiting() {
        let (done_tx, mut done_rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = done_tx.send(7u32);
        });
        let failing = async { Err(io::Error::new(io::ErrorKind::Other, "no signal handler")) };

        let outcome = wait_for_capture(&mut done_rx, failing).await;
        assert!(matches!(outcome, Some(Ok(7))));
    }

    #[tokio::test]
    async fn test_capture_thread_gone() {
        let (done_tx, mut done_rx) = oneshot::channel::<u32>();
        drop(done_tx);
        let outcome = wait_for_capture(&mut done_rx, std::future::pending()).await;
        assert!(matches!(outcome, Some(Err(_))));
    }
}
