//! Configuration (ambient stack, SPEC_FULL §C): a `serde_json`-backed
//! `HubConfig`, mountpoint URL parsing, and the NTRIP source-table parser
//! supplemented from `original_source/` (spec §6).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("malformed mountpoint url: {0}")]
    MalformedMountpointUrl(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NtripVersion {
    V1,
    V2,
    #[serde(rename = "2s")]
    V2s,
}

/// One configured input mountpoint (spec §6: `mountPoints`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountpointConfig {
    pub sta_id: String,
    pub host: String,
    pub port: u16,
    pub mountpoint: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub ntrip_version: NtripVersion,
}

/// One configured outbound upload row (spec §6: `uploadMountpointsOut`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadConfig {
    pub host: String,
    pub port: u16,
    pub mountpoint: String,
    pub ntrip_version: NtripVersion,
    pub user: Option<String>,
    pub password: Option<String>,
    pub provider_id: u16,
    pub solution_id: u8,
    pub issue_of_data: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    pub ssl_ca_cert_path: Option<String>,
    pub ssl_client_cert_path: Option<String>,
    pub ssl_ignore_errors: bool,
}

/// Outage/latency supervisor settings (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryConfig {
    pub advise_fail_minutes: u32,
    pub advise_reco_minutes: u32,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            advise_fail_minutes: 15,
            advise_reco_minutes: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    pub mount_points: Vec<MountpointConfig>,
    #[serde(default)]
    pub upload_mountpoints_out: Vec<UploadConfig>,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub advisory: AdvisoryConfig,
    pub corr_path: Option<String>,
    pub out_port: Option<u16>,
    /// RINEX navigation files to preload into the ephemeris pool at
    /// startup (spec §9 "RINEX navigation ingest").
    #[serde(default)]
    pub nav_files: Vec<String>,
}

impl HubConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Diffs against a freshly reread config: mountpoints present in
    /// `self` but absent from `new` should be stopped; the reverse should
    /// be started. Everything else continues undisturbed (spec §5).
    pub fn diff_mountpoints<'a>(&'a self, new: &'a Self) -> MountpointDiff<'a> {
        let removed = self
            .mount_points
            .iter()
            .filter(|m| !new.mount_points.iter().any(|n| n.sta_id == m.sta_id))
            .collect();
        let added = new
            .mount_points
            .iter()
            .filter(|n| !self.mount_points.iter().any(|m| m.sta_id == n.sta_id))
            .collect();
        MountpointDiff { removed, added }
    }
}

pub struct MountpointDiff<'a> {
    pub removed: Vec<&'a MountpointConfig>,
    pub added: Vec<&'a MountpointConfig>,
}

/// A parsed `//user:pass@host:port/mountpoint` input URL (spec §6).
#[derive(Debug, Clone, PartialEq)]
pub struct MountpointUrl {
    pub host: String,
    pub port: u16,
    pub mountpoint: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

pub fn parse_mountpoint_url(url: &str) -> Result<MountpointUrl, ConfigError> {
    let stripped = url.strip_prefix("//").unwrap_or(url);
    let (auth, rest) = match stripped.split_once('@') {
        Some((auth, rest)) => (Some(auth), rest),
        None => (None, stripped),
    };

    let (host_port, mountpoint) = rest
        .split_once('/')
        .ok_or_else(|| ConfigError::MalformedMountpointUrl(url.to_string()))?;

    let (host, port) = host_port
        .split_once(':')
        .ok_or_else(|| ConfigError::MalformedMountpointUrl(url.to_string()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| ConfigError::MalformedMountpointUrl(url.to_string()))?;

    if host.is_empty() || mountpoint.is_empty() {
        return Err(ConfigError::MalformedMountpointUrl(url.to_string()));
    }

    let (user, password) = match auth {
        Some(auth) => match auth.split_once(':') {
            Some((u, p)) => (Some(u.to_string()), Some(p.to_string())),
            None => (Some(auth.to_string()), None),
        },
        None => (None, None),
    };

    Ok(MountpointUrl {
        host: host.to_string(),
        port,
        mountpoint: mountpoint.to_string(),
        user,
        password,
    })
}

/// One row of an NTRIP source-table (spec §6: `STR;` lines).
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTableStream {
    pub mountpoint: String,
    pub identifier: String,
    pub format: String,
    pub network: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    pub nmea_required: bool,
}

/// One `NET;` row: a network's skeleton-directory URL.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTableNetwork {
    pub network: String,
    pub skeleton_url: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceTable {
    pub streams: Vec<SourceTableStream>,
    pub networks: Vec<SourceTableNetwork>,
}

/// Parses only the fields the core consumes from an NTRIP source-table
/// response (spec §6): `STR;` rows and `NET;` rows.
pub fn parse_source_table(body: &str) -> SourceTable {
    let mut table = SourceTable::default();
    for line in body.lines() {
        let fields: Vec<&str> = line.split(';').collect();
        match fields.first() {
            Some(&"STR") if fields.len() >= 11 => {
                table.streams.push(SourceTableStream {
                    mountpoint: fields[1].to_string(),
                    identifier: fields[2].to_string(),
                    format: fields[3].to_string(),
                    network: fields.get(7).copied().unwrap_or("").to_string(),
                    country: fields.get(8).copied().unwrap_or("").to_string(),
                    latitude: fields.get(9).and_then(|v| v.parse().ok()).unwrap_or(0.0),
                    longitude: fields.get(10).and_then(|v| v.parse().ok()).unwrap_or(0.0),
                    nmea_required: fields.get(11).map(|v| *v == "1").unwrap_or(false),
                });
            }
            Some(&"NET") if fields.len() >= 3 => {
                table.networks.push(SourceTableNetwork {
                    network: fields[1].to_string(),
                    skeleton_url: fields[2].to_string(),
                });
            }
            _ => {}
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mountpoint_url_with_credentials() {
        let parsed = parse_mountpoint_url("//user:pass@caster.example.com:2101/MOUNT1").unwrap();
        assert_eq!(parsed.host, "caster.example.com");
        assert_eq!(parsed.port, 2101);
        assert_eq!(parsed.mountpoint, "MOUNT1");
        assert_eq!(parsed.user.as_deref(), Some("user"));
        assert_eq!(parsed.password.as_deref(), Some("pass"));
    }

    #[test]
    fn parses_mountpoint_url_without_credentials() {
        let parsed = parse_mountpoint_url("//caster.example.com:2101/MOUNT1").unwrap();
        assert_eq!(parsed.user, None);
    }

    #[test]
    fn rejects_malformed_url() {
        assert!(parse_mountpoint_url("not-a-url").is_err());
    }

    #[test]
    fn parses_source_table_rows() {
        let body = "STR;MOUNT1;Station One;RTCM 3.3;1057(60);2;GPS+GLO;NetA;USA;40.0;-75.0;0;0;sNTRIP;none;B;N;0;\r\nNET;NetA;sub.example.com;N;N;none;none;http://example.com;none\r\nENDSOURCETABLE\r\n";
        let table = parse_source_table(body);
        assert_eq!(table.streams.len(), 1);
        assert_eq!(table.streams[0].mountpoint, "MOUNT1");
        assert_eq!(table.streams[0].network, "NetA");
        assert_eq!(table.networks.len(), 1);
        assert_eq!(table.networks[0].network, "NetA");
    }
}
