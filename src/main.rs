mod cli;

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use env_logger::{Builder, Target};
use gnss_rs::prelude::Constellation;
use log::{error, info, warn};

use gnss_ssr_hub::caster::{CasterError, UploadSession};
use gnss_ssr_hub::config::{HubConfig, MountpointConfig};
use gnss_ssr_hub::decoder::StreamDecoder;
use gnss_ssr_hub::dispatcher::{Artifact, Dispatcher, SubscriberId};
#[cfg(feature = "nav")]
use gnss_ssr_hub::ephemeris::pool::EphemerisPool;
use gnss_ssr_hub::error::HubError;
use gnss_ssr_hub::sinks::{CorrectionLog, RollInterval};
use gnss_ssr_hub::ssr::codec;
use gnss_ssr_hub::ssr::records::SsrProviderId;
use gnss_ssr_hub::supervisor::StreamHealth;
use gnss_ssr_hub::time::GnssTime;

const GPS_EPOCH_UNIX_SECONDS: i64 = 315_964_800;

fn wall_clock_gps() -> GnssTime {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    GnssTime::new(0, unix - GPS_EPOCH_UNIX_SECONDS)
}

fn connect_ntrip(mount: &MountpointConfig) -> std::io::Result<TcpStream> {
    let stream = TcpStream::connect((mount.host.as_str(), mount.port))?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;

    let auth = match (&mount.user, &mount.password) {
        (Some(u), Some(p)) => {
            use base64::engine::general_purpose::STANDARD as BASE64;
            use base64::Engine;
            format!("Authorization: Basic {}\r\n", BASE64.encode(format!("{u}:{p}")))
        }
        _ => String::new(),
    };
    let request =
        format!("GET /{} HTTP/1.1\r\nHost: {}\r\nNtrip-Version: Ntrip/2.0\r\nUser-Agent: NTRIP gnss-ssr-hub/1.0\r\n{auth}\r\n", mount.mountpoint, mount.host);

    let mut stream = stream;
    stream.write_all(request.as_bytes())?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut status = String::new();
    reader.read_line(&mut status)?;
    if !status.contains("200") && !status.starts_with("ICY 200") {
        warn!("{}: ntrip: unexpected status line {}", mount.sta_id, status.trim());
    }
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 || line == "\r\n" {
            break;
        }
    }
    Ok(stream)
}

#[cfg(feature = "nav")]
fn run_ingest_thread(mount: MountpointConfig, dispatcher: Arc<Dispatcher>, ephemeris_pool: Arc<EphemerisPool>, stop: Arc<AtomicBool>) {
    let sta_id: u32 = mount.sta_id.parse().unwrap_or(0);
    let mut decoder = StreamDecoder::new(sta_id).with_ephemeris_pool(ephemeris_pool);
    let mut health = StreamHealth::new(sta_id, Duration::from_secs(15 * 60), Duration::from_secs(5 * 60));

    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let mut stream = match connect_ntrip(&mount) {
            Ok(s) => s,
            Err(err) => {
                error!("{}: ntrip: connect failed: {err}", mount.sta_id);
                thread::sleep(Duration::from_secs(5));
                continue;
            }
        };
        info!("{}: ntrip: connected to {}:{}/{}", mount.sta_id, mount.host, mount.port, mount.mountpoint);

        let mut buf = [0u8; 4096];
        let mut last_sample_at = std::time::Instant::now();
        while !stop.load(Ordering::Relaxed) {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let now = wall_clock_gps();
                    decoder.decode(&buf[..n], now, &dispatcher);
                    let elapsed = last_sample_at.elapsed();
                    last_sample_at = std::time::Instant::now();
                    health.record_sample(0.0, elapsed, &dispatcher);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                    health.tick(Duration::from_secs(10), &dispatcher);
                }
                Err(err) => {
                    warn!("{}: ntrip: read error: {err}", mount.sta_id);
                    break;
                }
            }
        }
    }
}

#[cfg(not(feature = "nav"))]
fn run_ingest_thread(mount: MountpointConfig, dispatcher: Arc<Dispatcher>, stop: Arc<AtomicBool>) {
    let sta_id: u32 = mount.sta_id.parse().unwrap_or(0);
    let mut decoder = StreamDecoder::new(sta_id);
    let mut health = StreamHealth::new(sta_id, Duration::from_secs(15 * 60), Duration::from_secs(5 * 60));

    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let mut stream = match connect_ntrip(&mount) {
            Ok(s) => s,
            Err(err) => {
                error!("{}: ntrip: connect failed: {err}", mount.sta_id);
                thread::sleep(Duration::from_secs(5));
                continue;
            }
        };
        info!("{}: ntrip: connected to {}:{}/{}", mount.sta_id, mount.host, mount.port, mount.mountpoint);

        let mut buf = [0u8; 4096];
        let mut last_sample_at = std::time::Instant::now();
        while !stop.load(Ordering::Relaxed) {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let now = wall_clock_gps();
                    decoder.decode(&buf[..n], now, &dispatcher);
                    let elapsed = last_sample_at.elapsed();
                    last_sample_at = std::time::Instant::now();
                    health.record_sample(0.0, elapsed, &dispatcher);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                    health.tick(Duration::from_secs(10), &dispatcher);
                }
                Err(err) => {
                    warn!("{}: ntrip: read error: {err}", mount.sta_id);
                    break;
                }
            }
        }
    }
}

/// Builds a header for re-encoding a batch this process already merged and
/// dedupped on ingest, so `multiple_message` is always false here: whatever
/// the decoder published is already the complete group for its epoch.
fn upload_header(provider_id: SsrProviderId, update_interval_tag: u8, iod: u8, num_satellites: u8) -> codec::SsrHeader {
    codec::SsrHeader {
        epoch_time_sec: 0,
        update_interval_tag,
        multiple_message: false,
        iod,
        provider_id,
        satellite_reference_datum: false,
        num_satellites,
    }
}

fn with_epoch(mut header: codec::SsrHeader, time: GnssTime) -> codec::SsrHeader {
    header.epoch_time_sec = time.seconds_of_week as u32;
    header
}

/// Groups `entries` by constellation, preserving first-seen order, since
/// each SSR message covers a single system (spec §4.8).
fn group_by_constellation<T: Clone>(entries: &[T], system_of: impl Fn(&T) -> Constellation) -> Vec<(Constellation, Vec<T>)> {
    entries.iter().fold(Vec::new(), |mut groups: Vec<(Constellation, Vec<T>)>, e| {
        let system = system_of(e);
        match groups.iter_mut().find(|(sys, _)| *sys == system) {
            Some((_, g)) => g.push(e.clone()),
            None => groups.push((system, vec![e.clone()])),
        }
        groups
    })
}

/// Re-encodes one published [`Artifact`] into the wire frames the upload
/// caster should forward, grouped by constellation (spec §4.8). Artifacts
/// outside C8's scope (station health, ephemeris, raw bytes) produce nothing.
fn encode_artifact(artifact: &Artifact, provider_id: SsrProviderId) -> Vec<Vec<u8>> {
    match artifact {
        Artifact::OrbitCorrections(entries) => group_by_constellation(entries, |e| e.prn.system)
            .into_iter()
            .map(|(system, group)| {
                let header = with_epoch(
                    upload_header(provider_id, group[0].update_interval_tag, group[0].iod as u8, group.len() as u8),
                    group[0].time,
                );
                codec::encode_orbit(system, &header, &group)
            })
            .collect(),
        Artifact::ClockCorrections(entries) => group_by_constellation(entries, |e| e.prn.system)
            .into_iter()
            .map(|(system, group)| {
                let header = with_epoch(
                    upload_header(provider_id, group[0].update_interval_tag, group[0].iod as u8, group.len() as u8),
                    group[0].time,
                );
                codec::encode_clock(system, &header, &group)
            })
            .collect(),
        Artifact::CodeBiases(entries) => group_by_constellation(entries, |e| e.prn.system)
            .into_iter()
            .map(|(system, group)| {
                let header = with_epoch(
                    upload_header(provider_id, group[0].update_interval_tag, 0, group.len() as u8),
                    group[0].time,
                );
                codec::encode_code_bias(system, &header, &group)
            })
            .collect(),
        Artifact::PhaseBiases(entries) => group_by_constellation(entries, |e| e.prn.system)
            .into_iter()
            .map(|(system, group)| {
                let header = with_epoch(
                    upload_header(provider_id, group[0].update_interval_tag, 0, group.len() as u8),
                    group[0].time,
                );
                codec::encode_phase_bias(system, &header, &group)
            })
            .collect(),
        Artifact::Vtec(model) => vec![codec::encode_vtec(model)],
        #[cfg(feature = "nav")]
        Artifact::Ephemeris(_) => Vec::new(),
        Artifact::ProviderIdChanged { .. } | Artifact::LatencyUpdate { .. } | Artifact::Outage { .. } | Artifact::RawBytes { .. } => Vec::new(),
    }
}

/// Misconfiguration the backoff/retry loop can never work around, as
/// opposed to a transient network failure. Retrying it forever would just
/// spin the thread at its capped backoff interval with no hope of success.
fn is_fatal_caster_error(err: &CasterError) -> bool {
    #[cfg(not(feature = "tls"))]
    {
        matches!(err, CasterError::TlsNotSupported)
    }
    #[cfg(feature = "tls")]
    {
        let _ = err;
        false
    }
}

fn run_upload_thread(
    upload: gnss_ssr_hub::config::UploadConfig,
    proxy: gnss_ssr_hub::config::ProxyConfig,
    dispatcher: Arc<Dispatcher>,
    sub: SubscriberId,
    stop: Arc<AtomicBool>,
) {
    let mountpoint = upload.mountpoint.clone();
    let provider_id = SsrProviderId {
        provider_id: upload.provider_id,
        solution_id: upload.solution_id,
        issue_of_data: upload.issue_of_data,
    };
    let mut session = UploadSession::new(upload, proxy);
    while !stop.load(Ordering::Relaxed) {
        if let Err(err) = session.connect() {
            if is_fatal_caster_error(&err) {
                error!("upload caster {mountpoint}: {}", HubError::from(err));
                return;
            }
            thread::sleep(session.backoff_delay());
            continue;
        }
        while !stop.load(Ordering::Relaxed) {
            for artifact in dispatcher.take_pending(sub) {
                for payload in encode_artifact(&artifact, provider_id) {
                    session.offer(payload);
                }
            }
            if session.pump().is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(200));
        }
    }
}

/// Set by [`handle_sighup`]; polled by [`run_reread_thread`]. Only installed
/// when `--reread-on-sighup` is passed.
static SIGHUP_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sighup(_signum: libc::c_int) {
    SIGHUP_RECEIVED.store(true, Ordering::SeqCst);
}

/// One running ingest thread's cancellation flag and join handle.
type IngestHandle = (Arc<AtomicBool>, thread::JoinHandle<()>);
type IngestRegistry = Mutex<HashMap<String, IngestHandle>>;

/// Spawns an ingest thread for `mount` under its own cancellable stop flag
/// and registers it in `registry`, keyed by station id (spec §5).
#[cfg(feature = "nav")]
fn spawn_ingest(mount: MountpointConfig, dispatcher: Arc<Dispatcher>, ephemeris_pool: Arc<EphemerisPool>, registry: &IngestRegistry) {
    let sta_id = mount.sta_id.clone();
    let mount_stop = Arc::new(AtomicBool::new(false));
    let handle = {
        let mount_stop = mount_stop.clone();
        thread::spawn(move || run_ingest_thread(mount, dispatcher, ephemeris_pool, mount_stop))
    };
    registry.lock().unwrap().insert(sta_id, (mount_stop, handle));
}

#[cfg(not(feature = "nav"))]
fn spawn_ingest(mount: MountpointConfig, dispatcher: Arc<Dispatcher>, registry: &IngestRegistry) {
    let sta_id = mount.sta_id.clone();
    let mount_stop = Arc::new(AtomicBool::new(false));
    let handle = {
        let mount_stop = mount_stop.clone();
        thread::spawn(move || run_ingest_thread(mount, dispatcher, mount_stop))
    };
    registry.lock().unwrap().insert(sta_id, (mount_stop, handle));
}

/// Polls [`SIGHUP_RECEIVED`], rereads the config file on each signal, and
/// diffs the mountpoint set: stopped mountpoints are cancelled, new ones are
/// started, everything else runs undisturbed (spec §5's hot-reload rule).
fn run_reread_thread(
    config_path: String,
    current: Mutex<HubConfig>,
    dispatcher: Arc<Dispatcher>,
    #[cfg(feature = "nav")] ephemeris_pool: Arc<EphemerisPool>,
    registry: Arc<IngestRegistry>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_secs(1));
        if !SIGHUP_RECEIVED.swap(false, Ordering::SeqCst) {
            continue;
        }
        info!("sighup: rereading {config_path}");
        let new_config = match HubConfig::load(&config_path) {
            Ok(c) => c,
            Err(err) => {
                warn!("sighup: reread failed, keeping current config: {err}");
                continue;
            }
        };

        let mut current_guard = current.lock().unwrap();
        let diff = current_guard.diff_mountpoints(&new_config);
        let removed: Vec<MountpointConfig> = diff.removed.into_iter().cloned().collect();
        let added: Vec<MountpointConfig> = diff.added.into_iter().cloned().collect();

        for mount in &removed {
            if let Some((mount_stop, _)) = registry.lock().unwrap().remove(&mount.sta_id) {
                info!("sighup: stopping mountpoint {}", mount.sta_id);
                mount_stop.store(true, Ordering::Relaxed);
            }
        }
        for mount in added {
            info!("sighup: starting mountpoint {}", mount.sta_id);
            #[cfg(feature = "nav")]
            spawn_ingest(mount, dispatcher.clone(), ephemeris_pool.clone(), &registry);
            #[cfg(not(feature = "nav"))]
            spawn_ingest(mount, dispatcher.clone(), &registry);
        }
        *current_guard = new_config;
    }
}

/// Loads every configured RINEX nav file into a fresh ephemeris pool,
/// publishing one `Artifact::Ephemeris` per parsed record so subscribers
/// (the correction log, any upload caster) see the same startup snapshot
/// C6 will consult (spec §9 "RINEX navigation ingest").
#[cfg(feature = "nav")]
fn load_ephemeris_pool(nav_files: &[String], dispatcher: &Dispatcher) -> Arc<EphemerisPool> {
    let pool = EphemerisPool::new();
    for path in nav_files {
        match gnss_ssr_hub::ephemeris::load_rinex_nav_file(path) {
            Ok(records) => {
                info!("nav: loaded {} records from {path}", records.len());
                for eph in records {
                    pool.update(eph);
                    dispatcher.publish(Artifact::Ephemeris(eph));
                }
            }
            Err(err) => error!("nav: failed to load {path}: {err}"),
        }
    }
    pool
}

fn run_correction_log_thread(dispatcher: Arc<Dispatcher>, sub: SubscriberId, corr_path: String, stop: Arc<AtomicBool>) {
    let mut log = CorrectionLog::new(corr_path, "STD1", RollInterval::FifteenMin);
    while !stop.load(Ordering::Relaxed) {
        for artifact in dispatcher.take_pending(sub) {
            if let Err(err) = log.write_artifact(&artifact) {
                warn!("corr-log: write failed: {err}");
            }
        }
        thread::sleep(Duration::from_millis(500));
    }
}

/// Loads the hub config, surfaced through [`HubError`] so the one fallible
/// startup step shares the library's top-level error type with its other
/// consumers instead of reaching for `ConfigError` directly.
fn load_config(path: &str) -> Result<HubConfig, HubError> {
    Ok(HubConfig::load(path)?)
}

fn main() {
    let mut builder = Builder::from_default_env();
    builder.target(Target::Stdout).format_timestamp_secs().format_module_path(false).init();

    let cli = cli::Cli::new();
    let config = match load_config(cli.config_path()) {
        Ok(c) => c,
        Err(err) => {
            error!("{err}");
            std::process::exit(3);
        }
    };

    if config.mount_points.is_empty() {
        error!("config: no mountpoints configured");
        std::process::exit(3);
    }

    let dispatcher = Dispatcher::new();
    let stop = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::new();

    // Subscribe every downstream consumer before publishing the startup
    // ephemeris snapshot below, so nobody misses it (a late subscriber
    // only sees artifacts published after it subscribes).
    let upload_subs: Vec<_> = config.upload_mountpoints_out.iter().map(|_| dispatcher.subscribe()).collect();
    let corr_log_sub = config.corr_path.as_ref().map(|_| dispatcher.subscribe());

    #[cfg(feature = "nav")]
    let ephemeris_pool = load_ephemeris_pool(&config.nav_files, &dispatcher);

    let registry: Arc<IngestRegistry> = Arc::new(Mutex::new(HashMap::new()));
    for mount in config.mount_points.clone() {
        #[cfg(feature = "nav")]
        spawn_ingest(mount, dispatcher.clone(), ephemeris_pool.clone(), &registry);
        #[cfg(not(feature = "nav"))]
        spawn_ingest(mount, dispatcher.clone(), &registry);
    }

    if cli.reread_on_sighup() {
        unsafe {
            libc::signal(libc::SIGHUP, handle_sighup as *const () as usize);
        }
        let config_path = cli.config_path().to_string();
        let current = Mutex::new(config.clone());
        let dispatcher = dispatcher.clone();
        let registry = registry.clone();
        let stop = stop.clone();
        #[cfg(feature = "nav")]
        let ephemeris_pool = ephemeris_pool.clone();
        handles.push(thread::spawn(move || {
            run_reread_thread(
                config_path,
                current,
                dispatcher,
                #[cfg(feature = "nav")]
                ephemeris_pool,
                registry,
                stop,
            )
        }));
    }

    for (upload, sub) in config.upload_mountpoints_out.clone().into_iter().zip(upload_subs) {
        let proxy = config.proxy.clone();
        let dispatcher = dispatcher.clone();
        let stop = stop.clone();
        handles.push(thread::spawn(move || run_upload_thread(upload, proxy, dispatcher, sub, stop)));
    }

    if let (Some(corr_path), Some(sub)) = (config.corr_path.clone(), corr_log_sub) {
        let dispatcher = dispatcher.clone();
        let stop = stop.clone();
        handles.push(thread::spawn(move || run_correction_log_thread(dispatcher, sub, corr_path, stop)));
    }

    for handle in handles {
        let _ = handle.join();
    }
}
