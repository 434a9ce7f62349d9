//! Aircensus supervisor — wires the capture pipeline together.
//!
//! Startup order: publisher connect, monitor mode, store, publisher
//! start, channel hopper, then capture blocking on the main thread.
//! SIGINT/SIGTERM flip a shared flag; every loop polls it at its next
//! iteration boundary and teardown runs in reverse startup order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use env_logger::Env;

use aircensus::bus::AmqpBus;
use aircensus::capture::CaptureLoop;
use aircensus::config::Config;
use aircensus::publisher::Publisher;
use aircensus::radio::RadioController;
use aircensus::sink::MongoSink;
use aircensus::store::ObservationStore;
use aircensus::vendor::{HttpVendorApi, VendorApi, VendorResolver};

/// Stats report cadence.
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// How long teardown waits for a worker thread before abandoning it.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::new().filter_or("LOG_LEVEL", "info")).init();

    let config = Config::from_env();
    log::info!(
        "aircensus v{} starting on {}",
        env!("CARGO_PKG_VERSION"),
        config.interface
    );

    let running = Arc::new(AtomicBool::new(true));
    let signal_flag = running.clone();
    ctrlc::set_handler(move || {
        log::info!("interrupt received, shutting down");
        signal_flag.store(false, Ordering::SeqCst);
    })
    .context("failed to install signal handler")?;

    // ── Publisher ────────────────────────────────────────────────────

    let sink = MongoSink::new(&config.mongodb_uri, &config.mongodb_db);
    let bus = AmqpBus::new(&config.rabbitmq_host, &config.rabbitmq_queue);
    let vendor_api: Option<Box<dyn VendorApi>> = config
        .vendor_api_url
        .as_deref()
        .map(|url| Box::new(HttpVendorApi::new(url)) as Box<dyn VendorApi>);
    let publisher = Arc::new(Publisher::new(
        Box::new(sink),
        Box::new(bus),
        VendorResolver::new(vendor_api),
        config.batch_size,
        config.batch_interval,
    ));
    publisher.connect();

    // ── Radio ────────────────────────────────────────────────────────

    let radio = Arc::new(RadioController::new(config.interface.clone()));
    radio
        .enable_monitor()
        .context("failed to enable monitor mode")?;

    // ── Store, wired back into the publisher ─────────────────────────

    let device_publisher = publisher.clone();
    let ap_publisher = publisher.clone();
    let store = Arc::new(ObservationStore::with_callbacks(
        Some(Box::new(move |device, is_new| {
            device_publisher.on_device(device, is_new)
        })),
        Some(Box::new(move |ap, is_new| {
            ap_publisher.on_access_point(ap, is_new)
        })),
    ));

    publisher
        .clone()
        .start(store.clone())
        .context("failed to start publisher")?;

    // ── Channel hopper and stats reporter ────────────────────────────

    let hopper = {
        let radio = radio.clone();
        let running = running.clone();
        let plan = config.channel_plan();
        let interval = config.channel_hop_interval;
        thread::Builder::new()
            .name("chanhop".into())
            .spawn(move || radio.hop_loop(&plan, interval, &running))
            .context("failed to spawn channel hopper")?
    };

    let stats = {
        let store = store.clone();
        let radio = radio.clone();
        let running = running.clone();
        thread::Builder::new()
            .name("stats".into())
            .spawn(move || stats_loop(&store, &radio, &running))
            .context("failed to spawn stats reporter")?
    };

    // ── Capture, blocking on the main thread ─────────────────────────

    let capture = CaptureLoop::new(&config.interface, store.clone(), running.clone());
    let capture_result = capture.run();

    // ── Teardown, reverse of startup ─────────────────────────────────

    running.store(false, Ordering::SeqCst);
    join_with_timeout(hopper, JOIN_TIMEOUT, "chanhop");
    join_with_timeout(stats, JOIN_TIMEOUT, "stats");
    publisher.stop();
    radio.disable_monitor();

    capture_result.context("capture loop failed")?;
    log::info!("clean shutdown");
    Ok(())
}

/// Log store counts and the advisory channel every 30 s. Polls the
/// running flag often so teardown never waits out a full interval.
fn stats_loop(store: &ObservationStore, radio: &RadioController, running: &AtomicBool) {
    let mut last_report = Instant::now();
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(250));
        if last_report.elapsed() >= STATS_INTERVAL {
            let stats = store.stats(radio.current_channel());
            log::info!(
                "stats - devices: {}, APs: {}, channel: {}",
                stats.devices,
                stats.access_points,
                stats.channel
            );
            last_report = Instant::now();
        }
    }
}

/// Join a worker, abandoning it with a warning if it fails to exit in
/// time. Abandoned threads die with the process.
fn join_with_timeout(handle: thread::JoinHandle<()>, timeout: Duration, name: &str) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            log::warn!("{} thread did not stop within {:?}, abandoning", name, timeout);
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    if handle.join().is_err() {
        log::warn!("{} thread panicked", name);
    }
}
