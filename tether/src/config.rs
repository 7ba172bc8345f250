//! Server and client configuration with JSON persistence.

use std::path::Path;
use std::time::Duration;
use std::{fs, io};

use serde::{Deserialize, Serialize};
use tether_proto::Limits;
use tether_proto::codec::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_LEN};

/// How the server schedules accepted connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Mode {
    /// One thread per connection; connections run in parallel.
    #[default]
    Threaded,
    /// Serve each connection to completion before accepting the next.
    Sequential,
}

/// Server settings.
///
/// Unknown fields in a config file are rejected; missing fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct ServerConfig {
    /// Send returned lists by value instead of by handle.
    ///
    /// Faster, but the client receives a copy: later mutation on either side
    /// is not seen by the other. The default (`false`) keeps a list one shared
    /// object.
    pub lists_by_value: bool,
    /// Connection scheduling.
    pub mode: Mode,
    /// Drop every handle a connection received when it ends without `Bye`.
    pub release_on_disconnect: bool,
    /// Idle timeout for a connection waiting on its next request.
    pub read_timeout_ms: Option<u64>,
    /// Maximum sequence nesting accepted from clients.
    pub max_depth: usize,
    /// Maximum string or sequence length accepted from clients.
    pub max_len: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            lists_by_value: false,
            mode: Mode::Threaded,
            release_on_disconnect: false,
            read_timeout_ms: None,
            max_depth: DEFAULT_MAX_DEPTH,
            max_len: DEFAULT_MAX_LEN,
        }
    }
}

impl ServerConfig {
    /// Sets whether lists are returned by value.
    #[must_use]
    pub const fn lists_by_value(mut self, yes: bool) -> Self {
        self.lists_by_value = yes;
        self
    }

    /// Sets the connection scheduling mode.
    #[must_use]
    pub const fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Enables dropping a connection's handles when it dies without `Bye`.
    #[must_use]
    pub const fn release_on_disconnect(mut self, yes: bool) -> Self {
        self.release_on_disconnect = yes;
        self
    }

    /// Sets the per-connection idle timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout_ms = timeout.map(duration_ms);
        self
    }

    /// Sets the nesting ceiling for decoded values.
    #[must_use]
    pub const fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Decoder bounds derived from this config.
    pub const fn limits(&self) -> Limits {
        Limits::new(self.max_depth, self.max_len)
    }

    /// Idle timeout as a [`Duration`], if set.
    pub fn idle_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }

    /// Loads config from a JSON file.
    pub fn load(path: &Path) -> io::Result<Self> {
        load_json(path)
    }

    /// Persists config to a JSON file.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        save_json(self, path)
    }
}

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct ClientConfig {
    /// How long a call waits for its response before failing with
    /// [`Error::Timeout`](crate::Error::Timeout). `None` waits forever.
    pub read_timeout_ms: Option<u64>,
    /// How long to wait for the TCP connection to establish.
    pub connect_timeout_ms: Option<u64>,
    /// Remember every attribute a proxy has read and serve repeats locally.
    ///
    /// Only safe when remote attributes never change after the first read.
    pub cache_attributes: bool,
    /// Maximum sequence nesting accepted from the server.
    pub max_depth: usize,
    /// Maximum string or sequence length accepted from the server.
    pub max_len: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: None,
            connect_timeout_ms: None,
            cache_attributes: false,
            max_depth: DEFAULT_MAX_DEPTH,
            max_len: DEFAULT_MAX_LEN,
        }
    }
}

impl ClientConfig {
    /// Sets the response timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout_ms = timeout.map(duration_ms);
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout_ms = timeout.map(duration_ms);
        self
    }

    /// Enables the per-proxy attribute cache.
    #[must_use]
    pub const fn cache_attributes(mut self, yes: bool) -> Self {
        self.cache_attributes = yes;
        self
    }

    /// Decoder bounds derived from this config.
    pub const fn limits(&self) -> Limits {
        Limits::new(self.max_depth, self.max_len)
    }

    /// Response timeout as a [`Duration`], if set.
    pub fn response_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }

    /// Connect timeout as a [`Duration`], if set.
    pub fn dial_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_ms)
    }

    /// Loads config from a JSON file.
    pub fn load(path: &Path) -> io::Result<Self> {
        load_json(path)
    }

    /// Persists config to a JSON file.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        save_json(self, path)
    }
}

/// Reads a JSON file.
fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> io::Result<T> {
    let data = fs::read_to_string(path)?;
    serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Writes a JSON file, pretty-printed.
fn save_json<T: Serialize>(value: &T, path: &Path) -> io::Result<()> {
    let file = fs::File::create(path)?;
    serde_json::to_writer_pretty(file, value).map_err(io::Error::other)
}

/// Zero means "no timeout": sockets reject a zero duration.
fn millis(ms: Option<u64>) -> Option<Duration> {
    ms.filter(|&ms| ms > 0).map(Duration::from_millis)
}

/// Milliseconds in `d`, saturating.
fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_externalize_lists_and_run_threaded() {
        let cfg = ServerConfig::default();
        assert!(!cfg.lists_by_value);
        assert_eq!(cfg.mode, Mode::Threaded);
        assert!(!cfg.release_on_disconnect);
        assert_eq!(cfg.idle_timeout(), None);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        fs::write(&path, r#"{ "lists_by_value": true, "mode": "sequential" }"#).unwrap();

        let cfg = ServerConfig::load(&path).unwrap();
        assert!(cfg.lists_by_value);
        assert_eq!(cfg.mode, Mode::Sequential);
        assert_eq!(cfg.max_depth, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        fs::write(&path, r#"{ "list_by_value": true }"#).unwrap();

        let err = ServerConfig::load(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn client_config_roundtrips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        let cfg = ClientConfig::default()
            .read_timeout(Some(Duration::from_millis(250)))
            .cache_attributes(true);
        cfg.save(&path).unwrap();

        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.response_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn zero_timeout_means_none() {
        let cfg = ClientConfig {
            read_timeout_ms: Some(0),
            ..ClientConfig::default()
        };
        assert_eq!(cfg.response_timeout(), None);
    }
}
