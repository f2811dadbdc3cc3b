use std::sync::atomic::Ordering;

use anyhow::{Context, anyhow};
use tokio::{sync::broadcast, task::JoinError, time};
use tracing::{Level, error, info, warn};
use tracing_subscriber::{
    EnvFilter,
    fmt::{Layer, format::FmtSpan},
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};
use xdpscope::{
    attach,
    health::{HealthState, start_api_server},
    metrics::{self, registry},
    runtime::{Runtime, capabilities, signals::ShutdownSignals},
    sink::LogSink,
    source::{
        ingest::{IngestError, IngestStats, IngestionLoop},
        mode::{probe_ring_buf, select_mode},
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Runtime { conf, .. } = Runtime::new()?;
    init_tracing(conf.log_level);

    info!(
        event.name = "app.starting",
        network.interface.name = %conf.interface,
        ebpf.object = %conf.object_path.display(),
        delivery.preference = ?conf.delivery,
        "starting xdpscope"
    );

    attach::raise_memlock_rlimit();
    if let Err(e) = capabilities::check_required_capabilities() {
        warn!(
            event.name = "capabilities.insufficient",
            error.message = %e,
            "capability check failed, loading the probe will likely fail"
        );
    }

    registry::init_registry().context("failed to initialize metrics registry")?;

    let mode = select_mode(conf.delivery, probe_ring_buf)?;
    metrics::ingest::set_delivery_mode(mode);

    let health_state = HealthState::default();
    {
        let state = health_state.clone();
        let api_conf = conf.api.clone();
        tokio::spawn(async move {
            if let Err(e) = start_api_server(state, &api_conf).await {
                error!(
                    event.name = "api.failed",
                    error.message = %e,
                    "api server stopped"
                );
            }
        });
    }

    let mut signals =
        ShutdownSignals::install().context("failed to listen for shutdown signals")?;

    let (_ebpf, reader) = attach::load_and_attach(
        &conf.object_path,
        &conf.interface,
        mode,
        conf.perf_options(),
    )?;
    health_state.ebpf_loaded.store(true, Ordering::Relaxed);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let ingest_running = health_state.ingest_running.clone();
    ingest_running.store(true, Ordering::Relaxed);
    let sink = LogSink::new(conf.log_format);
    let mut ingest_handle = tokio::spawn(async move {
        let result = IngestionLoop::new(reader, sink, shutdown_rx).run().await;
        ingest_running.store(false, Ordering::Relaxed);
        result
    });

    tokio::select! {
        signal = signals.recv() => {
            info!(
                event.name = "app.shutdown_requested",
                process.signal = signal,
                "shutdown signal received, stopping ingestion"
            );
            let _ = shutdown_tx.send(());
        }
        joined = &mut ingest_handle => return finish(joined),
    }

    match time::timeout(conf.shutdown_timeout, ingest_handle).await {
        Ok(joined) => finish(joined),
        Err(_) => {
            error!(
                event.name = "app.shutdown_timeout",
                timeout = %humantime::format_duration(conf.shutdown_timeout),
                "ingestion loop did not stop in time"
            );
            Err(anyhow!(
                "ingestion loop did not stop within {}",
                humantime::format_duration(conf.shutdown_timeout)
            ))
        }
    }
}

fn init_tracing(log_level: Level) {
    let mut fmt_layer = Layer::new()
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(std::env::var("NO_COLOR").is_err());

    match log_level {
        Level::DEBUG => fmt_layer = fmt_layer.with_file(true).with_line_number(true),
        Level::TRACE => {
            fmt_layer = fmt_layer
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
        }
        _ => {}
    }

    let filter = EnvFilter::new(format!("warn,xdpscope={log_level}"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn finish(joined: Result<Result<IngestStats, IngestError>, JoinError>) -> anyhow::Result<()> {
    match joined {
        Ok(Ok(stats)) => {
            info!(
                event.name = "app.stopped",
                ingest.records = stats.records,
                ingest.packets = stats.packets,
                ingest.malformed = stats.malformed,
                ingest.read_errors = stats.read_errors,
                "xdpscope stopped"
            );
            Ok(())
        }
        Ok(Err(e)) => Err(e).context("ingestion loop failed"),
        Err(e) => Err(anyhow!("ingestion task panicked: {e}")),
    }
}
