//! TLS credential cache for the streaming endpoint.
//!
//! Certificates rotate without a service restart: each inbound connection
//! asks the cache for the current transport config, and the cache re-reads
//! the credential files at most once per refresh interval. Concurrent misses
//! may race to refresh; the overwrite is idempotent, so no lock is held
//! across the disk reads.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};

use berth_core::clock::Clock;
use berth_core::error::{BerthError, Result};

/// How long a computed transport config is served before the credential
/// files are re-read.
pub const CERT_REFRESH_MINUTES: i64 = 5;

struct CachedConfig {
    config: Arc<ServerConfig>,
    expires: DateTime<Utc>,
}

/// Time-bounded cache of parsed transport-security material.
pub struct CertConfigCache {
    cert_path: PathBuf,
    key_path: PathBuf,
    ca_path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    cached: Mutex<Option<CachedConfig>>,
}

impl CertConfigCache {
    pub fn new(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        ca_path: Option<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_path,
            clock,
            cached: Mutex::new(None),
        }
    }

    /// Get the transport config for an inbound connection.
    ///
    /// Served from cache while valid; otherwise recomputed from disk. A
    /// failed recompute fails only this call and leaves the stale entry
    /// untouched, so a transient read error does not poison later attempts.
    pub fn get_config(&self) -> Result<Arc<ServerConfig>> {
        let now = self.clock.now();
        if let Some(cached) = &*self.cached.lock() {
            if now < cached.expires {
                return Ok(cached.config.clone());
            }
        }

        let config = Arc::new(self.load_config()?);
        *self.cached.lock() = Some(CachedConfig {
            config: config.clone(),
            expires: now + Duration::minutes(CERT_REFRESH_MINUTES),
        });
        Ok(config)
    }

    fn load_config(&self) -> Result<ServerConfig> {
        let certs = load_certs(&self.cert_path)?;
        let key = load_key(&self.key_path)?;

        let config = match &self.ca_path {
            Some(ca_path) => {
                let ca_certs = load_certs(ca_path)?;
                let mut roots = RootCertStore::empty();
                for cert in ca_certs {
                    roots.add(cert).map_err(|e| {
                        BerthError::TlsError(format!(
                            "failed to add CA certificate from {}: {}",
                            ca_path.display(),
                            e
                        ))
                    })?;
                }
                let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                    .build()
                    .map_err(|e| {
                        BerthError::TlsError(format!("failed to build client verifier: {}", e))
                    })?;
                ServerConfig::builder()
                    .with_client_cert_verifier(verifier)
                    .with_single_cert(certs, key)
            }
            None => ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(certs, key),
        };

        config.map_err(|e| BerthError::TlsError(format!("failed to build server config: {}", e)))
    }
}

/// Load a PEM certificate chain.
pub(crate) fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        BerthError::TlsError(format!("failed to open certificate {}: {}", path.display(), e))
    })?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| {
            BerthError::TlsError(format!(
                "failed to parse certificate {}: {}",
                path.display(),
                e
            ))
        })?;
    if certs.is_empty() {
        return Err(BerthError::TlsError(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Load a PEM private key.
pub(crate) fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| {
        BerthError::TlsError(format!("failed to open key {}: {}", path.display(), e))
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| {
            BerthError::TlsError(format!("failed to parse key {}: {}", path.display(), e))
        })?
        .ok_or_else(|| BerthError::TlsError(format!("no private key found in {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Utc::now())))
        }

        fn advance_minutes(&self, minutes: i64) {
            *self.0.lock() += Duration::minutes(minutes);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock()
        }
    }

    fn install_provider() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    fn write_cert_pair(dir: &Path) -> (PathBuf, PathBuf) {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.join("stream.crt");
        let key_path = dir.join("stream.key");
        std::fs::write(&cert_path, cert.cert.pem()).unwrap();
        std::fs::write(&key_path, cert.key_pair.serialize_pem()).unwrap();
        (cert_path, key_path)
    }

    fn write_ca(dir: &Path) -> PathBuf {
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        let ca_path = dir.join("ca.crt");
        std::fs::write(&ca_path, cert.pem()).unwrap();
        ca_path
    }

    #[test]
    fn test_cache_hit_returns_same_config_without_disk_read() {
        install_provider();
        let dir = tempfile::tempdir().unwrap();
        let (cert_path, key_path) = write_cert_pair(dir.path());
        let clock = ManualClock::new();
        let cache = CertConfigCache::new(&cert_path, &key_path, None, clock.clone());

        let first = cache.get_config().unwrap();

        // Remove the files: a second call within the window must not touch disk.
        std::fs::remove_file(&cert_path).unwrap();
        std::fs::remove_file(&key_path).unwrap();
        clock.advance_minutes(4);
        let second = cache.get_config().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_expired_cache_reloads_from_disk() {
        install_provider();
        let dir = tempfile::tempdir().unwrap();
        let (cert_path, key_path) = write_cert_pair(dir.path());
        let clock = ManualClock::new();
        let cache = CertConfigCache::new(&cert_path, &key_path, None, clock.clone());

        let first = cache.get_config().unwrap();
        clock.advance_minutes(CERT_REFRESH_MINUTES);
        let second = cache.get_config().unwrap();

        // A config is valid strictly before its expiry; at expiry it is rebuilt.
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_failed_reload_does_not_poison_cache() {
        install_provider();
        let dir = tempfile::tempdir().unwrap();
        let (cert_path, key_path) = write_cert_pair(dir.path());
        let clock = ManualClock::new();
        let cache = CertConfigCache::new(&cert_path, &key_path, None, clock.clone());

        cache.get_config().unwrap();
        clock.advance_minutes(CERT_REFRESH_MINUTES + 1);

        let key_pem = std::fs::read(&key_path).unwrap();
        std::fs::remove_file(&key_path).unwrap();
        assert!(cache.get_config().is_err());

        // Restoring the file makes the next attempt succeed.
        std::fs::write(&key_path, key_pem).unwrap();
        assert!(cache.get_config().is_ok());
    }

    #[test]
    fn test_client_auth_requires_ca_bundle() {
        install_provider();
        let dir = tempfile::tempdir().unwrap();
        let (cert_path, key_path) = write_cert_pair(dir.path());
        let ca_path = write_ca(dir.path());
        let clock = ManualClock::new();
        let cache = CertConfigCache::new(&cert_path, &key_path, Some(ca_path), clock);

        assert!(cache.get_config().is_ok());
    }

    #[test]
    fn test_missing_certificate_errors() {
        install_provider();
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new();
        let cache = CertConfigCache::new(
            dir.path().join("missing.crt"),
            dir.path().join("missing.key"),
            None,
            clock,
        );

        assert!(matches!(cache.get_config(), Err(BerthError::TlsError(_))));
    }

    #[test]
    fn test_load_certs_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.crt");
        std::fs::write(&path, "").unwrap();

        let err = load_certs(&path).unwrap_err();
        assert!(err.to_string().contains("no certificates"));
    }
}
