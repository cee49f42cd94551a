//! TLS session and certificate inspection.
//!
//! Uses rustls with a verifier that records the web PKI verdict instead of
//! aborting on it, so expired, self-signed and mismatched certificates can
//! still be read. Signatures are always checked.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, trace, warn};
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, ring};
use rustls::{ClientConfig, DigitallySignedStruct, ProtocolVersion, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use x509_parser::prelude::*;

use crate::config::ProbeConfig;
use crate::error::{ProbeErrorKind, ProbeFailure};
use crate::services::resolver::HostResolver;
use crate::services::validator::{ValidatedTarget, is_internal_ip};
use crate::types::TlsResult;

const DEFAULT_TLS_PORT: u16 = 443;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

static PROVIDER: LazyLock<Arc<CryptoProvider>> =
    LazyLock::new(|| Arc::new(ring::default_provider()));

static WEBPKI_ROOTS: LazyLock<Arc<RootCertStore>> = LazyLock::new(|| {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(roots)
});

/// Certificate verifier that never rejects, remembering what the real
/// verifier would have said.
#[derive(Debug)]
struct InspectingVerifier {
    inner: Arc<WebPkiServerVerifier>,
    verdict: Mutex<Option<Result<(), String>>>,
}

impl InspectingVerifier {
    fn new(roots: Arc<RootCertStore>) -> Result<Self, String> {
        let inner = WebPkiServerVerifier::builder_with_provider(roots, Arc::clone(&PROVIDER))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            inner,
            verdict: Mutex::new(None),
        })
    }

    fn verdict(&self) -> Option<Result<(), String>> {
        self.verdict.lock().ok().and_then(|v| v.clone())
    }
}

impl ServerCertVerifier for InspectingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let verdict = self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
            .map(|_| ())
            .map_err(|e| e.to_string());
        if let Ok(mut slot) = self.verdict.lock() {
            *slot = Some(verdict);
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

pub struct TlsProber {
    config: Arc<ProbeConfig>,
    resolver: Arc<dyn HostResolver>,
    roots: Arc<RootCertStore>,
    port: u16,
}

impl TlsProber {
    pub fn new(config: Arc<ProbeConfig>, resolver: Arc<dyn HostResolver>) -> Self {
        Self {
            config,
            resolver,
            roots: Arc::clone(&WEBPKI_ROOTS),
            port: DEFAULT_TLS_PORT,
        }
    }

    /// Connect to `port` instead of 443.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Replace the trust anchors used for the `trusted` verdict.
    #[must_use]
    pub fn with_roots(mut self, roots: RootCertStore) -> Self {
        self.roots = Arc::new(roots);
        self
    }

    pub async fn inspect(&self, target: &ValidatedTarget) -> TlsResult {
        let host = target.input.as_str();
        let wait = self.config.timeout.tls_timeout();
        debug!("[TLS] Starting check for {host}:{}", self.port);
        let start_time = Instant::now();

        // 1. Establish TCP connection
        let addr = match self.connect_addr(target).await {
            Ok(addr) => addr,
            Err(failure) => return TlsResult::failed(host, failure),
        };
        trace!("[TLS] Connecting to {addr}");
        let stream = match timeout(wait, TcpStream::connect(addr)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                warn!("[TLS] TCP connection failed: {e}");
                return TlsResult::failed(host, ProbeFailure::connection(format!("Connection failed: {e}")));
            }
            Err(_) => {
                warn!("[TLS] TCP connection timeout ({}ms)", wait.as_millis());
                return TlsResult::failed(host, ProbeFailure::timeout("Connection timed out"));
            }
        };

        // 2. Configure rustls client
        let verifier = match InspectingVerifier::new(Arc::clone(&self.roots)) {
            Ok(v) => Arc::new(v),
            Err(e) => {
                return TlsResult::failed(
                    host,
                    ProbeFailure::new(ProbeErrorKind::Unexpected, format!("TLS setup failed: {e}")),
                );
            }
        };
        let config = match ClientConfig::builder_with_provider(Arc::clone(&PROVIDER))
            .with_safe_default_protocol_versions()
        {
            Ok(builder) => builder
                .dangerous()
                .with_custom_certificate_verifier(verifier.clone())
                .with_no_client_auth(),
            Err(e) => {
                return TlsResult::failed(
                    host,
                    ProbeFailure::new(ProbeErrorKind::Unexpected, format!("TLS setup failed: {e}")),
                );
            }
        };
        let connector = TlsConnector::from(Arc::new(config));

        let Ok(server_name) = ServerName::try_from(target.host.clone()) else {
            warn!("[TLS] Invalid server name: {}", target.host);
            return TlsResult::failed(host, ProbeFailure::protocol("Invalid server name"));
        };

        // 3. TLS handshake
        let mut tls_stream = match timeout(wait, connector.connect(server_name, stream)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                warn!("[TLS] Handshake with {host} failed: {e}");
                return TlsResult::failed(host, ProbeFailure::protocol(format!("TLS handshake failed: {e}")));
            }
            Err(_) => {
                warn!("[TLS] Handshake with {host} timed out ({}ms)", wait.as_millis());
                return TlsResult::failed(host, ProbeFailure::timeout("TLS handshake timed out"));
            }
        };
        trace!("[TLS] Handshake completed in {:?}", start_time.elapsed());

        // 4. Read session parameters and the leaf certificate
        let (_, session) = tls_stream.get_ref();
        let protocol = session.protocol_version().map(format_protocol);
        let cipher_suite = session
            .negotiated_cipher_suite()
            .map(|s| format_cipher_suite(&format!("{:?}", s.suite())));
        let leaf = session
            .peer_certificates()
            .and_then(|certs| certs.first())
            .map(|c| c.as_ref().to_vec());

        // Close the session before parsing; the stream is dropped either way.
        if timeout(SHUTDOWN_TIMEOUT, tls_stream.shutdown()).await.is_err() {
            trace!("[TLS] Shutdown of {host} timed out");
        }
        drop(tls_stream);

        let Some(leaf) = leaf else {
            warn!("[TLS] No certificate presented by {host}");
            return TlsResult::failed(host, ProbeFailure::protocol("No certificate found"));
        };

        let mut result = match describe_certificate(host, &leaf, Utc::now().date_naive()) {
            Ok(result) => result,
            Err(failure) => return TlsResult::failed(host, failure),
        };
        result.protocol = protocol;
        result.cipher_suite = cipher_suite;
        match verifier.verdict() {
            Some(Ok(())) => result.trusted = Some(true),
            Some(Err(reason)) => {
                result.trusted = Some(false);
                result.verification_error = Some(reason);
            }
            None => {
                result.trusted = Some(false);
                result.verification_error = Some("Certificate was not verified".to_string());
            }
        }

        debug!(
            "[TLS] Check completed: {host} - trusted={:?}, expired={:?}, days={:?}, total_time={:?}",
            result.trusted,
            result.expired,
            result.days_until_expiry,
            start_time.elapsed()
        );
        result
    }

    /// Pinned address if validation produced one, otherwise a fresh lookup
    /// subject to the same internal-address rule.
    async fn connect_addr(&self, target: &ValidatedTarget) -> Result<SocketAddr, ProbeFailure> {
        if let Some(ip) = target.pinned_addr {
            return Ok(SocketAddr::new(ip, self.port));
        }
        let addrs = self.resolver.resolve(&target.host).await?;
        if self.config.security.block_internal_ips && addrs.iter().copied().any(is_internal_ip) {
            return Err(ProbeFailure::connection(format!(
                "{} resolves to an internal address",
                target.host
            )));
        }
        addrs
            .first()
            .map(|ip: &IpAddr| SocketAddr::new(*ip, self.port))
            .ok_or_else(|| ProbeFailure::host_not_found(format!("Host not found: {}", target.host)))
    }
}

/// Build the certificate part of a [`TlsResult`] from a DER leaf.
fn describe_certificate(host: &str, der: &[u8], today: NaiveDate) -> Result<TlsResult, ProbeFailure> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|e| {
        warn!("[TLS] Certificate parsing failed: {e}");
        ProbeFailure::protocol(format!("Certificate parsing failed: {e}"))
    })?;

    let valid_from = to_date(cert.validity().not_before.timestamp());
    let valid_until = to_date(cert.validity().not_after.timestamp());
    let days_until_expiry = valid_until.map(|until| days_until(until, today));

    let mut result = TlsResult::empty(host);
    result.issuer = Some(extract_common_name(&cert.issuer().to_string()));
    result.subject = Some(extract_common_name(&cert.subject().to_string()));
    result.valid_from = valid_from;
    result.valid_until = valid_until;
    result.days_until_expiry = days_until_expiry;
    result.expired = days_until_expiry.map(|d| d < 0);
    result.serial_number = Some(cert.serial.to_str_radix(16).to_uppercase());
    result.subject_alternative_names = dns_names(&cert);
    Ok(result)
}

/// DNS names from the SAN extension. A malformed extension counts as none.
fn dns_names(cert: &X509Certificate<'_>) -> Option<Vec<String>> {
    let names: Vec<String> = match cert.subject_alternative_name() {
        Ok(Some(ext)) => ext
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some((*dns).to_string()),
                _ => None,
            })
            .collect(),
        Ok(None) => Vec::new(),
        Err(e) => {
            trace!("[TLS] Ignoring unreadable SAN extension: {e}");
            Vec::new()
        }
    };
    (!names.is_empty()).then_some(names)
}

fn to_date(timestamp: i64) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp(timestamp, 0).map(|dt| dt.date_naive())
}

/// Signed whole days from `today` to `valid_until`.
pub(crate) fn days_until(valid_until: NaiveDate, today: NaiveDate) -> i64 {
    (valid_until - today).num_days()
}

/// Value of the `CN=` component of a distinguished name, or the whole DN
/// when there is none.
pub(crate) fn extract_common_name(dn: &str) -> String {
    dn.split(',')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("CN="))
        .map_or_else(|| dn.to_string(), ToString::to_string)
}

fn format_protocol(version: ProtocolVersion) -> String {
    match version {
        ProtocolVersion::TLSv1_2 => "TLSv1.2".to_string(),
        ProtocolVersion::TLSv1_3 => "TLSv1.3".to_string(),
        other => format!("{other:?}"),
    }
}

/// rustls names TLS 1.3 suites `TLS13_*`; report the IANA `TLS_*` form.
fn format_cipher_suite(name: &str) -> String {
    name.strip_prefix("TLS13_")
        .map_or_else(|| name.to_string(), |rest| format!("TLS_{rest}"))
}
