//! Upload caster (C8): the outbound NTRIP v1/v2/v2s client state machine
//! that re-broadcasts corrections to an upstream caster (spec §4.8).
//!
//! One [`UploadSession`] owns one [`std::net::TcpStream`] and walks the
//! `Idle -> Connecting -> Handshaking -> Streaming -> BackingOff` cycle.
//! The single-slot `outBuffer` (most-recent-wins) discipline means a
//! producer never blocks on a slow uplink: [`UploadSession::offer`]
//! simply replaces whatever was queued.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

use crate::config::{NtripVersion, ProxyConfig, UploadConfig};

#[derive(Error, Debug)]
pub enum CasterError {
    #[error("io error talking to caster: {0}")]
    Io(#[from] std::io::Error),

    #[error("caster rejected credentials or mountpoint: {0}")]
    Rejected(String),

    #[error("caster response did not start with a recognised status line")]
    MalformedResponse,

    #[error("proxy CONNECT tunnel failed: {0}")]
    ProxyTunnel(String),

    #[cfg(feature = "tls")]
    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),

    #[cfg(not(feature = "tls"))]
    #[error("NTRIP v2s requires the crate's `tls` feature")]
    TlsNotSupported,
}

/// The caster's socket, plain or wrapped in TLS for NTRIP v2s (spec §4.8).
enum Stream {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<native_tls::TlsStream<TcpStream>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.flush(),
        }
    }
}

/// Connection lifecycle, spec §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasterState {
    Idle,
    Connecting,
    Handshaking,
    Streaming,
    BackingOff,
}

/// The single-slot most-recent-wins outbound buffer. A call to `offer`
/// always replaces the previous unsent payload rather than queuing.
#[derive(Default)]
struct OutBuffer {
    pending: Option<Vec<u8>>,
}

/// Caps the exponential backoff delay applied after a connection failure.
pub const MAX_BACKOFF_SECONDS: u64 = 256;

fn backoff_delay(trial: u32) -> Duration {
    let secs = 2u64.saturating_pow(trial).min(MAX_BACKOFF_SECONDS);
    Duration::from_secs(secs)
}

/// One outbound NTRIP session: one upload mountpoint, one TCP connection.
pub struct UploadSession {
    config: UploadConfig,
    proxy: ProxyConfig,
    state: CasterState,
    trial: u32,
    stream: Option<Stream>,
    out: Mutex<OutBuffer>,
}

impl UploadSession {
    pub fn new(config: UploadConfig, proxy: ProxyConfig) -> Self {
        Self {
            config,
            proxy,
            state: CasterState::Idle,
            trial: 0,
            stream: None,
            out: Mutex::new(OutBuffer::default()),
        }
    }

    pub fn state(&self) -> CasterState {
        self.state
    }

    /// Replaces the pending outbound payload. Called by the stream
    /// re-encoder each time a fresh message is ready to upload; overwrites
    /// whatever was queued and not yet sent (spec §4.8: "most recent
    /// correction wins, the caster never queues a backlog").
    pub fn offer(&self, payload: Vec<u8>) {
        self.out.lock().expect("out buffer mutex poisoned").pending = Some(payload);
    }

    fn connect_raw(&self) -> Result<TcpStream, CasterError> {
        let addr = (self.config.host.as_str(), self.config.port);
        match (&self.proxy.proxy_host, self.proxy.proxy_port) {
            (Some(proxy_host), Some(proxy_port)) => {
                let mut stream = TcpStream::connect((proxy_host.as_str(), proxy_port))?;
                let connect_req = format!(
                    "CONNECT {}:{} HTTP/1.1\r\nHost: {}:{}\r\n\r\n",
                    self.config.host, self.config.port, self.config.host, self.config.port
                );
                stream.write_all(connect_req.as_bytes())?;
                let mut response = [0u8; 512];
                let n = stream.read(&mut response)?;
                let text = String::from_utf8_lossy(&response[..n]);
                if !text.starts_with("HTTP/1.0 200") && !text.starts_with("HTTP/1.1 200") {
                    return Err(CasterError::ProxyTunnel(text.trim().to_string()));
                }
                Ok(stream)
            }
            _ => Ok(TcpStream::connect(addr)?),
        }
    }

    fn handshake_request(&self) -> String {
        let auth = match (&self.config.user, &self.config.password) {
            (Some(u), Some(p)) => {
                let encoded = BASE64.encode(format!("{u}:{p}"));
                format!("Authorization: Basic {encoded}\r\n")
            }
            _ => String::new(),
        };

        match self.config.ntrip_version {
            NtripVersion::V1 => format!(
                "SOURCE {} /{}\r\nSource-Agent: NTRIP gnss-ssr-hub\r\n\r\n",
                self.config.password.clone().unwrap_or_default(),
                self.config.mountpoint
            ),
            NtripVersion::V2 | NtripVersion::V2s => format!(
                "POST /{} HTTP/1.1\r\nHost: {}\r\nNtrip-Version: Ntrip/2.0\r\nUser-Agent: NTRIP gnss-ssr-hub/1.0\r\n{auth}Connection: close\r\nTransfer-Encoding: chunked\r\n\r\n",
                self.config.mountpoint, self.config.host,
            ),
        }
    }

    #[cfg(feature = "tls")]
    fn wrap_tls(&self, stream: TcpStream) -> Result<Stream, CasterError> {
        let mut builder = native_tls::TlsConnector::builder();
        if self.proxy.ssl_ignore_errors {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        if let Some(ca_path) = &self.proxy.ssl_ca_cert_path {
            let pem = std::fs::read(ca_path)?;
            builder.add_root_certificate(native_tls::Certificate::from_pem(&pem)?);
        }
        if let Some(client_path) = &self.proxy.ssl_client_cert_path {
            let pkcs12 = std::fs::read(client_path)?;
            builder.identity(native_tls::Identity::from_pkcs12(&pkcs12, "")?);
        }
        let connector = builder.build()?;
        let tls_stream = connector.connect(&self.config.host, stream).map_err(|err| match err {
            native_tls::HandshakeError::Failure(err) => CasterError::Tls(err),
            native_tls::HandshakeError::WouldBlock(_) => {
                CasterError::Rejected("tls handshake would block on a non-blocking socket".to_string())
            }
        })?;
        Ok(Stream::Tls(Box::new(tls_stream)))
    }

    fn establish(&self, raw: TcpStream) -> Result<Stream, CasterError> {
        match self.config.ntrip_version {
            #[cfg(feature = "tls")]
            NtripVersion::V2s => self.wrap_tls(raw),
            #[cfg(not(feature = "tls"))]
            NtripVersion::V2s => Err(CasterError::TlsNotSupported),
            NtripVersion::V1 | NtripVersion::V2 => Ok(Stream::Plain(raw)),
        }
    }

    /// Performs one connect-handshake attempt. On success, leaves the
    /// session in [`CasterState::Streaming`] with a live socket ready for
    /// [`UploadSession::pump`]. On failure, advances to `BackingOff` and
    /// bumps the retry trial counter.
    pub fn connect(&mut self) -> Result<(), CasterError> {
        self.state = CasterState::Connecting;
        let result = self.connect_raw().and_then(|raw| self.establish(raw)).and_then(|mut stream| {
            self.state = CasterState::Handshaking;
            stream.write_all(self.handshake_request().as_bytes())?;

            let mut response = [0u8; 512];
            let n = stream.read(&mut response)?;
            let text = String::from_utf8_lossy(&response[..n]);
            let first_line = text.lines().next().ok_or(CasterError::MalformedResponse)?;

            let accepted = first_line.starts_with("ICY 200")
                || first_line.contains("200 OK")
                || first_line.trim() == "OK";
            if !accepted {
                return Err(CasterError::Rejected(first_line.to_string()));
            }
            Ok(stream)
        });

        match result {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = CasterState::Streaming;
                self.trial = 0;
                Ok(())
            }
            Err(err) => {
                self.stream = None;
                self.state = CasterState::BackingOff;
                self.trial += 1;
                Err(err)
            }
        }
    }

    pub fn backoff_delay(&self) -> Duration {
        backoff_delay(self.trial)
    }

    /// Sends whatever is currently queued, chunk-encoded per NTRIP v2
    /// (spec §4.8). No-op if nothing is pending or the session isn't
    /// streaming. On write failure, transitions to `BackingOff`.
    pub fn pump(&mut self) -> Result<(), CasterError> {
        let payload = self.out.lock().expect("out buffer mutex poisoned").pending.take();
        let Some(payload) = payload else {
            return Ok(());
        };
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };

        let result = (|| -> Result<(), std::io::Error> {
            match self.config.ntrip_version {
                NtripVersion::V1 => stream.write_all(&payload),
                NtripVersion::V2 | NtripVersion::V2s => {
                    let header = format!("{:X}\r\n", payload.len());
                    stream.write_all(header.as_bytes())?;
                    stream.write_all(&payload)?;
                    stream.write_all(b"\r\n")
                }
            }
        })();

        if let Err(err) = result {
            self.stream = None;
            self.state = CasterState::BackingOff;
            self.trial += 1;
            return Err(err.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> UploadConfig {
        UploadConfig {
            host: "caster.example.com".to_string(),
            port: 2101,
            mountpoint: "SSR1".to_string(),
            ntrip_version: NtripVersion::V2,
            user: Some("user".to_string()),
            password: Some("pass".to_string()),
            provider_id: 0,
            solution_id: 0,
            issue_of_data: 0,
        }
    }

    #[test]
    fn backoff_grows_exponentially_then_caps() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(8), Duration::from_secs(256));
        assert_eq!(backoff_delay(20), Duration::from_secs(256));
    }

    #[test]
    fn v2_handshake_request_includes_chunked_and_auth() {
        let session = UploadSession::new(sample_config(), ProxyConfig::default());
        let request = session.handshake_request();
        assert!(request.starts_with("POST /SSR1 HTTP/1.1"));
        assert!(request.contains("Transfer-Encoding: chunked"));
        assert!(request.contains("Authorization: Basic"));
    }

    #[test]
    fn offer_replaces_pending_payload_most_recent_wins() {
        let session = UploadSession::new(sample_config(), ProxyConfig::default());
        session.offer(vec![1, 2, 3]);
        session.offer(vec![4, 5]);
        assert_eq!(session.out.lock().unwrap().pending, Some(vec![4, 5]));
    }

    #[test]
    fn new_session_starts_idle() {
        let session = UploadSession::new(sample_config(), ProxyConfig::default());
        assert_eq!(session.state(), CasterState::Idle);
    }

    fn loopback_stream() -> TcpStream {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        TcpStream::connect(addr).unwrap()
    }

    #[test]
    fn establish_wraps_plain_stream_for_v1_and_v2() {
        let mut config = sample_config();
        config.ntrip_version = NtripVersion::V2;
        let session = UploadSession::new(config, ProxyConfig::default());
        let stream = session.establish(loopback_stream()).unwrap();
        assert!(matches!(stream, Stream::Plain(_)));
    }

    #[cfg(not(feature = "tls"))]
    #[test]
    fn establish_rejects_v2s_without_tls_feature() {
        let mut config = sample_config();
        config.ntrip_version = NtripVersion::V2s;
        let session = UploadSession::new(config, ProxyConfig::default());
        assert!(matches!(session.establish(loopback_stream()), Err(CasterError::TlsNotSupported)));
    }

    #[cfg(feature = "tls")]
    #[test]
    fn establish_rejects_v2s_against_a_non_tls_peer() {
        let mut config = sample_config();
        config.ntrip_version = NtripVersion::V2s;
        let session = UploadSession::new(config, ProxyConfig::default());
        assert!(session.establish(loopback_stream()).is_err());
    }
}
