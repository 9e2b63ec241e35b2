//! File-backed configuration store shared by the CLI, the scheduled job, and
//! the background service.
//!
//! Writes go to a temp file in the target directory, are synced, and are then
//! renamed over the config, so readers see either the old or the new file.
//! Mutations hold an exclusive advisory lock on a sidecar `<config>.lock`
//! file across the whole read-modify-write cycle. The kernel drops the lock
//! when its holder exits, so a crashed process never blocks later writers.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, Feed, default_config_path, is_valid_email, validate_feed_url};
use crate::error::{Result, SwrError};

/// How long a mutation waits for the lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Persistent home of the singleton [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    lock_timeout: Duration,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Store at `~/.config/swr/config.toml`.
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(default_config_path()?))
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    // -----------------------------------------------------------------------
    // Whole-record access
    // -----------------------------------------------------------------------

    /// Read and parse the config. Fails with `ConfigMissing` if absent.
    pub fn load(&self) -> Result<Config> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SwrError::ConfigMissing {
                    path: self.path.clone(),
                });
            }
            Err(e) => return Err(SwrError::io(&self.path, e)),
        };

        toml::from_str(&content).map_err(|e| {
            SwrError::config(format!("failed to parse {}: {e}", self.path.display()))
        })
    }

    /// Like [`load`](Self::load) but falls back to defaults for a first run.
    pub fn load_or_default(&self) -> Result<Config> {
        match self.load() {
            Err(SwrError::ConfigMissing { .. }) => Ok(Config::default()),
            other => other,
        }
    }

    /// Write `config` whether or not a file exists yet (first-run path).
    pub fn init(&self, config: &Config) -> Result<()> {
        self.save(config)?;
        info!(path = ?self.path, "config initialized");
        Ok(())
    }

    /// Validate and atomically replace the stored config.
    pub fn save(&self, config: &Config) -> Result<()> {
        config.validate()?;
        let _guard = self.lock()?;
        self.write(config)
    }

    /// Locked read-modify-write. `f` may fail, in which case nothing is written.
    pub fn update<T>(&self, f: impl FnOnce(&mut Config) -> Result<T>) -> Result<T> {
        let _guard = self.lock()?;
        let mut config = self.load()?;
        let out = f(&mut config)?;
        config.validate()?;
        self.write(&config)?;
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Dotted-key access
    // -----------------------------------------------------------------------

    /// Value at a dotted key, e.g. `retention.audio_months`.
    pub fn get(&self, key: &str) -> Result<toml::Value> {
        let doc = to_document(&self.load()?)?;
        lookup(&doc, key).cloned()
    }

    /// Parse `raw` to the type of the scalar at `key`, validate, and persist.
    ///
    /// Returns the value as stored.
    pub fn set(&self, key: &str, raw: &str) -> Result<toml::Value> {
        let value = self.update(|config| {
            let mut doc = to_document(config)?;
            let slot = lookup_mut(&mut doc, key)?;
            let value = coerce(key, slot, raw)?;
            *slot = value.clone();

            *config = doc
                .try_into()
                .map_err(|e| SwrError::validation(format!("invalid value for '{key}': {e}")))?;
            Ok(value)
        })?;
        info!(key, "config value set");
        Ok(value)
    }

    // -----------------------------------------------------------------------
    // Feeds & receivers
    // -----------------------------------------------------------------------

    pub fn add_feed(&self, name: &str, url: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SwrError::validation("feed name must not be empty"));
        }
        validate_feed_url(url)?;

        self.update(|config| {
            if config.feeds.iter().any(|f| f.name == name) {
                return Err(SwrError::DuplicateEntry {
                    kind: "feed",
                    value: name.to_string(),
                });
            }
            config.feeds.push(Feed {
                name: name.to_string(),
                url: url.to_string(),
            });
            Ok(())
        })?;
        info!(name, url, "feed added");
        Ok(())
    }

    pub fn remove_feed(&self, name: &str) -> Result<()> {
        self.update(|config| {
            let before = config.feeds.len();
            config.feeds.retain(|f| f.name != name);
            if config.feeds.len() == before {
                return Err(SwrError::NotFound {
                    kind: "feed",
                    value: name.to_string(),
                });
            }
            Ok(())
        })?;
        info!(name, "feed removed");
        Ok(())
    }

    pub fn add_receiver(&self, email: &str) -> Result<()> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(SwrError::validation(format!("invalid email address '{email}'")));
        }

        self.update(|config| {
            if config.email.to.iter().any(|r| r.eq_ignore_ascii_case(email)) {
                return Err(SwrError::DuplicateEntry {
                    kind: "receiver",
                    value: email.to_string(),
                });
            }
            config.email.to.push(email.to_string());
            Ok(())
        })?;
        info!(email, "receiver added");
        Ok(())
    }

    pub fn remove_receiver(&self, email: &str) -> Result<()> {
        let email = email.trim();
        self.update(|config| {
            let before = config.email.to.len();
            config.email.to.retain(|r| !r.eq_ignore_ascii_case(email));
            if config.email.to.len() == before {
                return Err(SwrError::NotFound {
                    kind: "receiver",
                    value: email.to_string(),
                });
            }
            Ok(())
        })?;
        info!(email, "receiver removed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn lock(&self) -> Result<LockGuard> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SwrError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| SwrError::io(&lock_path, e))?;

        let started = Instant::now();
        loop {
            match file.try_lock() {
                Ok(()) => break,
                Err(TryLockError::WouldBlock) => {
                    let waited = started.elapsed();
                    if waited >= self.lock_timeout {
                        let holder = std::fs::read_to_string(&lock_path).unwrap_or_default();
                        warn!(path = ?lock_path, holder = holder.trim(), ?waited, "config lock still held");
                        return Err(SwrError::ConfigLockTimeout {
                            path: lock_path,
                            waited,
                        });
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(TryLockError::Error(e)) => return Err(SwrError::io(&lock_path, e)),
            }
        }

        // Holder pid, reported by waiters that time out.
        file.set_len(0)
            .and_then(|()| file.rewind())
            .and_then(|()| writeln!(file, "{}", std::process::id()))
            .map_err(|e| SwrError::io(&lock_path, e))?;
        debug!(path = ?lock_path, "config lock acquired");
        Ok(LockGuard { _file: file })
    }

    fn write(&self, config: &Config) -> Result<()> {
        let content = toml::to_string_pretty(config)
            .map_err(|e| SwrError::config(format!("failed to serialize config: {e}")))?;
        write_atomic(&self.path, &content)?;
        debug!(path = ?self.path, bytes = content.len(), "config written");
        Ok(())
    }
}

/// Holds the locked file; closing it releases the lock.
struct LockGuard {
    _file: File,
}

/// Write to a sibling temp file, sync, then rename over `path`.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| SwrError::io(dir, e))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("config");
    let tmp_path = dir.join(format!(".{file_name}.{}.tmp", Uuid::now_v7()));

    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;

        // The file may hold an SMTP password.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp_path, path)
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(SwrError::io(path, e));
    }
    Ok(())
}

fn to_document(config: &Config) -> Result<toml::Value> {
    toml::Value::try_from(config)
        .map_err(|e| SwrError::config(format!("failed to serialize config: {e}")))
}

fn lookup<'a>(doc: &'a toml::Value, key: &str) -> Result<&'a toml::Value> {
    let invalid = || SwrError::InvalidKey {
        key: key.to_string(),
    };
    if key.is_empty() {
        return Err(invalid());
    }
    key.split('.')
        .try_fold(doc, |node, part| node.as_table().and_then(|t| t.get(part)))
        .ok_or_else(invalid)
}

fn lookup_mut<'a>(doc: &'a mut toml::Value, key: &str) -> Result<&'a mut toml::Value> {
    let invalid = || SwrError::InvalidKey {
        key: key.to_string(),
    };
    if key.is_empty() {
        return Err(invalid());
    }
    let mut node = doc;
    for part in key.split('.') {
        node = node
            .as_table_mut()
            .and_then(|t| t.get_mut(part))
            .ok_or_else(invalid)?;
    }
    Ok(node)
}

/// Parse `raw` into the same TOML type as the current value.
fn coerce(key: &str, current: &toml::Value, raw: &str) -> Result<toml::Value> {
    let raw_trimmed = raw.trim();
    match current {
        toml::Value::String(_) => Ok(toml::Value::String(raw.to_string())),
        toml::Value::Integer(_) => {
            let n: i64 = raw_trimmed.parse().map_err(|_| {
                SwrError::validation(format!("'{key}' expects an integer, got '{raw}'"))
            })?;
            if n < 0 {
                return Err(SwrError::validation(format!(
                    "'{key}' must be non-negative, got {n}"
                )));
            }
            Ok(toml::Value::Integer(n))
        }
        toml::Value::Float(_) => raw_trimmed
            .parse::<f64>()
            .map(toml::Value::Float)
            .map_err(|_| SwrError::validation(format!("'{key}' expects a number, got '{raw}'"))),
        toml::Value::Boolean(_) => match raw_trimmed.to_ascii_lowercase().as_str() {
            "true" => Ok(toml::Value::Boolean(true)),
            "false" => Ok(toml::Value::Boolean(false)),
            _ => Err(SwrError::validation(format!(
                "'{key}' expects true or false, got '{raw}'"
            ))),
        },
        toml::Value::Array(_) | toml::Value::Table(_) => Err(SwrError::validation(format!(
            "'{key}' is not a single value; use the podcast/receiver commands for lists"
        ))),
        toml::Value::Datetime(_) => Err(SwrError::InvalidKey {
            key: key.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn temp_store() -> ConfigStore {
        let dir = std::env::temp_dir().join(format!("swr-store-test-{}", Uuid::now_v7()));
        let store = ConfigStore::new(dir.join("config.toml"));
        let mut config = Config::default();
        config.parent_folder = dir.join("data").to_string_lossy().into_owned();
        store.init(&config).expect("init store");
        store
    }

    #[test]
    fn load_missing_is_config_missing() {
        let path = std::env::temp_dir().join(format!("swr-missing-{}/config.toml", Uuid::now_v7()));
        let store = ConfigStore::new(&path);
        assert!(matches!(store.load(), Err(SwrError::ConfigMissing { .. })));
        assert_eq!(store.load_or_default().expect("defaults"), Config::default());
    }

    #[test]
    fn save_leaves_no_temp_files() {
        let store = temp_store();
        store.save(&store.load().expect("load")).expect("save");
        let dir = store.path().parent().expect("parent");
        let leftovers: Vec<_> = std::fs::read_dir(dir)
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let lock = File::open(store.lock_path()).expect("lock file");
        lock.try_lock().expect("lock released after save");
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = temp_store();
        let cases = [
            ("lookback_days", "14", toml::Value::Integer(14)),
            ("retention.audio_months", "6", toml::Value::Integer(6)),
            ("retention.reports_months", "0", toml::Value::Integer(0)),
            ("whisper_model", "large-v3", toml::Value::String("large-v3".into())),
            ("email.smtp_host", "smtp.example.com", toml::Value::String("smtp.example.com".into())),
            ("email.smtp_port", "465", toml::Value::Integer(465)),
            ("email.from", "bot@example.com", toml::Value::String("bot@example.com".into())),
            ("retry.multiplier", "1.5", toml::Value::Float(1.5)),
        ];
        for (key, raw, expected) in cases {
            let stored = store.set(key, raw).expect(key);
            assert_eq!(stored, expected, "{key}");
            assert_eq!(store.get(key).expect(key), expected, "{key}");
        }
        assert_eq!(store.load().expect("load").retention.audio_months, 6);
    }

    #[test]
    fn set_unknown_key_leaves_file_untouched() {
        let store = temp_store();
        let before = std::fs::read(store.path()).expect("read");

        for key in ["nope", "retention.video_months", "email.smtp_port.x", ""] {
            let err = store.set(key, "1").unwrap_err();
            assert!(matches!(err, SwrError::InvalidKey { .. }), "{key}: {err}");
        }

        assert_eq!(std::fs::read(store.path()).expect("read"), before);
    }

    #[test]
    fn set_rejects_bad_values() {
        let store = temp_store();
        let before = std::fs::read(store.path()).expect("read");

        for (key, raw) in [
            ("retention.audio_months", "-1"),
            ("retention.audio_months", "three"),
            ("email.smtp_port", "70000"),
            ("lookback_days", "0"),
            ("feeds", "x"),
            ("email.from", "not-an-email"),
        ] {
            let err = store.set(key, raw).unwrap_err();
            assert!(matches!(err, SwrError::Validation { .. }), "{key}={raw}: {err}");
        }

        assert_eq!(std::fs::read(store.path()).expect("read"), before);
    }

    #[test]
    fn duplicate_feed_is_rejected_and_store_unchanged() {
        let store = temp_store();
        store
            .add_feed("Morning Call", "https://feeds.example.com/morning.xml")
            .expect("add");
        let before = std::fs::read(store.path()).expect("read");

        let err = store
            .add_feed("Morning Call", "https://feeds.example.com/other.xml")
            .unwrap_err();
        assert!(matches!(err, SwrError::DuplicateEntry { kind: "feed", .. }));
        assert_eq!(std::fs::read(store.path()).expect("read"), before);

        store.remove_feed("Morning Call").expect("remove");
        assert!(matches!(
            store.remove_feed("Morning Call"),
            Err(SwrError::NotFound { kind: "feed", .. })
        ));
    }

    #[test]
    fn duplicate_receiver_is_rejected_and_store_unchanged() {
        let store = temp_store();
        store.add_receiver("ops@example.com").expect("add");
        let before = std::fs::read(store.path()).expect("read");

        let err = store.add_receiver("OPS@example.com").unwrap_err();
        assert!(matches!(err, SwrError::DuplicateEntry { kind: "receiver", .. }));
        assert!(matches!(store.add_receiver("nope"), Err(SwrError::Validation { .. })));
        assert_eq!(std::fs::read(store.path()).expect("read"), before);

        store.remove_receiver("ops@example.com").expect("remove");
        assert!(store.load().expect("load").email.to.is_empty());
        assert!(matches!(
            store.remove_receiver("ops@example.com"),
            Err(SwrError::NotFound { .. })
        ));
    }

    #[test]
    fn set_rejects_retry_values_that_overflow_backoff() {
        let store = temp_store();
        let before = std::fs::read(store.path()).expect("read");

        assert!(matches!(
            store.set("retry.multiplier", "1e300"),
            Err(SwrError::Validation { .. })
        ));
        assert!(matches!(
            store.set("retry.base_delay_secs", "99999999"),
            Err(SwrError::Validation { .. })
        ));
        assert_eq!(std::fs::read(store.path()).expect("read"), before);

        store.set("retry.multiplier", "10").expect("upper bound");
        let policy = crate::RetryPolicy::from(&store.load().expect("load").retry);
        assert!(policy.delay_after(2) <= crate::retry::MAX_BACKOFF);
    }

    #[test]
    fn held_lock_times_out() {
        let store = temp_store().with_lock_timeout(Duration::from_millis(50));
        let holder = File::open(store.lock_path()).expect("lock file");
        holder.lock().expect("hold lock");

        let err = store.set("lookback_days", "10").unwrap_err();
        assert!(matches!(err, SwrError::ConfigLockTimeout { .. }));
        assert_eq!(store.load().expect("load").lookback_days, Config::default().lookback_days);

        drop(holder);
        store.set("lookback_days", "10").expect("set after release");
    }

    #[test]
    fn leftover_lock_file_from_dead_process_does_not_block() {
        let store = temp_store().with_lock_timeout(Duration::from_millis(50));
        std::fs::write(store.lock_path(), "4242\n").expect("leftover lock file");

        store.set("lookback_days", "12").expect("set");
        assert_eq!(store.load().expect("load").lookback_days, 12);

        let pid = std::fs::read_to_string(store.lock_path()).expect("read lock file");
        assert_eq!(pid.trim(), std::process::id().to_string());
    }

    #[test]
    fn concurrent_disjoint_sets_are_not_lost() {
        let store = Arc::new(temp_store());

        let a = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for months in 1..=20 {
                    store
                        .set("retention.audio_months", &months.to_string())
                        .expect("set audio");
                }
            })
        };
        let b = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for days in 1..=20 {
                    store.set("lookback_days", &days.to_string()).expect("set lookback");
                }
            })
        };
        a.join().expect("thread a");
        b.join().expect("thread b");

        let config = store.load().expect("load");
        assert_eq!(config.retention.audio_months, 20);
        assert_eq!(config.lookback_days, 20);
    }
}
