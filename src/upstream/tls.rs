//! Upstream TLS trust configuration.
//!
//! The trust bundle is produced once at startup (see [`TrustBundle::load_dir`])
//! and turned into a [`TlsPolicy`] for the shared HTTP client.

use reqwest::{Certificate, ClientBuilder};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

const CERT_EXTENSIONS: &[&str] = &["pem", "crt", "cer"];

/// Extra certificate authorities to trust for upstream connections.
#[derive(Debug, Clone, Default)]
pub struct TrustBundle {
    /// Concatenated PEM certificates
    pub pem: Option<String>,
    pub custom_certificates: bool,
    pub file_count: usize,
}

impl TrustBundle {
    pub fn from_pem(pem: impl Into<String>) -> Self {
        let pem = pem.into();
        let present = !pem.trim().is_empty();
        Self {
            pem: present.then_some(pem),
            custom_certificates: present,
            file_count: usize::from(present),
        }
    }

    /// Concatenate every `.pem`, `.crt` and `.cer` file in `dir`.
    ///
    /// Unreadable files are skipped with a warning; an empty directory
    /// yields an empty bundle.
    pub fn load_dir(dir: impl AsRef<Path>) -> io::Result<Self> {
        let mut pem = String::new();
        let mut file_count = 0;

        let mut paths: Vec<_> = fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| CERT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        paths.sort();

        for path in paths {
            match fs::read_to_string(&path) {
                Ok(contents) if contents.contains("-----BEGIN CERTIFICATE-----") => {
                    debug!("Loaded CA certificate {}", path.display());
                    pem.push_str(contents.trim_end());
                    pem.push('\n');
                    file_count += 1;
                }
                Ok(_) => warn!("Skipping {}: no PEM certificate found", path.display()),
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }

        Ok(Self {
            custom_certificates: file_count > 0,
            pem: (file_count > 0).then_some(pem),
            file_count,
        })
    }
}

/// How upstream certificates are verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPolicy {
    /// System roots plus the loaded bundle
    VerifyWithBundle,
    VerifySystem,
    /// Only when the operator explicitly asked for it
    SkipVerification,
}

impl TlsPolicy {
    pub fn select(trust: &TrustBundle, skip_verify: bool) -> Self {
        if trust.custom_certificates && trust.pem.is_some() {
            TlsPolicy::VerifyWithBundle
        } else if skip_verify {
            TlsPolicy::SkipVerification
        } else {
            TlsPolicy::VerifySystem
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TlsPolicy::VerifyWithBundle => "bundle",
            TlsPolicy::VerifySystem => "system",
            TlsPolicy::SkipVerification => "disabled",
        }
    }

    /// Apply this policy to a client under construction.
    pub fn configure(
        &self,
        mut builder: ClientBuilder,
        trust: &TrustBundle,
    ) -> Result<ClientBuilder, reqwest::Error> {
        match self {
            TlsPolicy::VerifyWithBundle => {
                if let Some(pem) = &trust.pem {
                    for cert in Certificate::from_pem_bundle(pem.as_bytes())? {
                        builder = builder.add_root_certificate(cert);
                    }
                }
            }
            TlsPolicy::VerifySystem => {}
            TlsPolicy::SkipVerification => {
                warn!("Upstream TLS certificate verification is DISABLED (TLS_SKIP_VERIFY)");
                builder = builder.danger_accept_invalid_certs(true);
            }
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("hls-relay-{name}-{nanos}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    const FAKE_CERT: &str = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    #[test]
    fn bundle_takes_precedence_over_skip() {
        let trust = TrustBundle::from_pem(FAKE_CERT);
        assert_eq!(TlsPolicy::select(&trust, true), TlsPolicy::VerifyWithBundle);
    }

    #[test]
    fn skip_only_when_explicit() {
        let empty = TrustBundle::default();
        assert_eq!(TlsPolicy::select(&empty, false), TlsPolicy::VerifySystem);
        assert_eq!(TlsPolicy::select(&empty, true), TlsPolicy::SkipVerification);
    }

    #[test]
    fn empty_pem_is_no_bundle() {
        let trust = TrustBundle::from_pem("   ");
        assert!(!trust.custom_certificates);
        assert!(trust.pem.is_none());
    }

    #[test]
    fn load_dir_reads_certificate_files_only() {
        let dir = scratch_dir("certs");
        fs::write(dir.join("a.pem"), FAKE_CERT).unwrap();
        fs::write(dir.join("b.CRT"), FAKE_CERT).unwrap();
        fs::write(dir.join("notes.txt"), FAKE_CERT).unwrap();
        fs::write(dir.join("empty.cer"), "nothing here").unwrap();

        let bundle = TrustBundle::load_dir(&dir).unwrap();
        assert_eq!(bundle.file_count, 2);
        assert!(bundle.custom_certificates);
        assert_eq!(bundle.pem.unwrap().matches("BEGIN CERTIFICATE").count(), 2);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn load_dir_missing_directory_errors() {
        assert!(TrustBundle::load_dir("/definitely/not/here/hls-relay").is_err());
    }

    #[test]
    fn system_policy_builds_client() {
        let builder = TlsPolicy::VerifySystem
            .configure(reqwest::Client::builder(), &TrustBundle::default())
            .unwrap();
        assert!(builder.build().is_ok());
    }
}
