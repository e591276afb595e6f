use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use fern::colors::ColoredLevelConfig;
use log::LevelFilter;
use shadow_host::link_audio::{self, LinkAudioReader};
use shadow_host::mailbox::Mailbox;
use shadow_host::midi_bus;
use shadow_host::module_manager::ModuleManager;
use shadow_host::monitor::SubscriberMonitor;
use shadow_host::publisher::{self, PublisherCore};
use shadow_host::subscriber::LinkSubscriber;
use shadow_host::tick::{HostTick, NullUi};
use shadow_shared::settings::HostSettings;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const DEVICE_PATH: &str = "/dev/ablspi0.0";
const BASE_DIR: &str = "/data/UserData/shadowbox";

fn setup_logging() {
    let log_colors = ColoredLevelConfig::default();

    #[cfg(debug_assertions)]
    const MAIN_LOG_LEVEL: LevelFilter = LevelFilter::Debug;
    #[cfg(not(debug_assertions))]
    const MAIN_LOG_LEVEL: LevelFilter = LevelFilter::Info;

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%H:%M:%S]"),
                record.target(),
                log_colors.color(record.level()),
                message
            ))
        })
        .level(MAIN_LOG_LEVEL)
        .chain(std::io::stdout())
        .apply()
        .expect("logger init");
}

/// Publisher thread: wakes on block ticks, drains accumulator rings to
/// UDP, announces the session, and honors channel requests.
fn spawn_publisher_thread(
    mut core: PublisherCore,
    reader_endpoint: Arc<LinkAudioReader>,
    tick_rx: crossbeam_channel::Receiver<()>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let socket = match UdpSocket::bind("0.0.0.0:0") {
            Ok(s) => s,
            Err(e) => {
                log::warn!("publisher: no socket: {e}");
                return;
            }
        };
        let _ = socket.set_nonblocking(true);
        let mut recv_buf = [0u8; 256];
        let started = std::time::Instant::now();

        // Runs until the tick sender is dropped at shutdown.
        while let Ok(()) = tick_rx.recv() {
            while let Ok((n, from)) = socket.recv_from(&mut recv_buf) {
                core.on_datagram(&recv_buf[..n], from);
            }

            let captured = reader_endpoint.captured_endpoint().map(|e| e.dest);
            let now_ns = started.elapsed().as_nanos() as u64;
            core.on_tick(now_ns, &mut |outgoing| {
                if let Some(dest) = outgoing.dest.or(captured) {
                    let _ = socket.send_to(&outgoing.payload, dest);
                }
            });
        }
        log::info!("publisher thread exited");
    })
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 {
        eprintln!("usage: shadow-host <script.js>");
        std::process::exit(1);
    }
    // The script layer runs out of process; the path is recorded for it.
    let script = args.get(1).cloned().unwrap_or_else(|| "move_default.js".to_string());
    log::info!("ui script: {script}");

    let base_dir = PathBuf::from(
        std::env::var("SHADOW_BASE_DIR").unwrap_or_else(|_| BASE_DIR.to_string()),
    );

    // Mailbox is fatal: without the device there is nothing to host.
    let device =
        std::env::var("SHADOW_DEVICE").unwrap_or_else(|_| DEVICE_PATH.to_string());
    let mut mailbox = Mailbox::open(Path::new(&device))
        .with_context(|| format!("mailbox unavailable at {device}"))?;
    mailbox.start_stream();

    let settings = Arc::new(ArcSwap::from_pointee(HostSettings::load(
        &base_dir.join("settings.txt"),
    )));

    let mut modules = ModuleManager::new(
        mailbox.base_ptr(),
        midi_bus::midi_send_internal_cb,
        midi_bus::midi_send_external_cb,
    );
    let modules_dir = base_dir.join("modules");
    log::info!("scanning for modules in {}", modules_dir.display());
    modules.scan(&modules_dir);

    // Link-audio intercept, subscriber and watchdog.
    let endpoint_path = base_dir.join("link-audio-endpoint");
    let (intercept, reader) = link_audio::link_audio(Some(endpoint_path));
    let reader = Arc::new(reader);

    let mut _in_process_subscriber = None;
    let mut _subscriber_monitor = None;
    if let Ok(cmd) = std::env::var("SHADOW_LINK_SUBSCRIBER") {
        // External subscriber process, watched for staleness.
        let counter_reader = Arc::clone(&reader);
        _subscriber_monitor = Some(SubscriberMonitor::spawn(
            move || std::process::Command::new(&cmd),
            move || counter_reader.packets_intercepted(),
            || {},
        ));
    } else if let Ok(bind) = std::env::var("SHADOW_LINK_BIND") {
        match bind.parse() {
            Ok(addr) => match LinkSubscriber::spawn(addr, intercept) {
                Ok(sub) => _in_process_subscriber = Some(sub),
                Err(e) => log::warn!("link subscriber failed: {e}"),
            },
            Err(e) => log::warn!("bad SHADOW_LINK_BIND: {e}"),
        }
    }

    // Publisher: peer/session identity fresh per run.
    let peer_id = fastrand::u64(..).to_be_bytes();
    let session_id = fastrand::u64(..).to_be_bytes();
    let (pub_handle, pub_core) = publisher::publisher(peer_id, session_id);
    let (tick_tx, tick_rx) = crossbeam_channel::bounded(4);
    let publisher_thread = spawn_publisher_thread(pub_core, Arc::clone(&reader), tick_rx);

    let mut host = HostTick::new(mailbox, modules, settings);
    host.attach_publisher(pub_handle, tick_tx);

    // Optionally start with a module loaded.
    if let Ok(id) = std::env::var("SHADOW_MODULE") {
        if let Err(e) = host.modules.load_by_id(&id) {
            log::warn!("initial module load failed: {e}");
        }
    }

    let mut ui = NullUi;
    while !host.exit_requested {
        host.run_block(&mut ui);

        if host.menu_reload_requested {
            host.menu_reload_requested = false;
            host.unload_module();
        }
    }

    log::info!("shutting down");
    host.unload_module();
    // Dropping the host drops the tick sender, stopping the publisher.
    drop(host);
    let _ = publisher_thread.join();
    Ok(())
}

fn main() {
    setup_logging();
    if let Err(e) = run() {
        log::error!("{e:#}");
        std::process::exit(1);
    }

    // Give detached helper threads a beat to wind down.
    std::thread::sleep(Duration::from_millis(50));
}
