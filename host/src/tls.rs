//! TLS bootstrap. Each Apollo cluster has one self-signed CA certificate;
//! it is generated (or loaded) once, persisted in the cert store and
//! redistributed to clients inside the authenticated login handshake.

use std::{io::Write, path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context};
use apollo_store::{Entity, KvBackend};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::info;

use crate::ListenSection;

pub const CERT_STORE_TABLE: &str = "cert_store";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsData {
    pub key: String,
    /// PEM certificate.
    pub cert_data: String,
    /// PEM private key.
    pub key_data: String,
}

impl Entity for TlsData {
    const TABLE: &'static str = CERT_STORE_TABLE;

    fn primary_key(&self) -> &str {
        &self.key
    }
}

/// Owns the certificate and key consumed by the HTTPS listener, plus the
/// cert body shipped to clients. Temp files created here are removed when
/// the manager is dropped; user-provided files are left alone.
pub struct TlsManager {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    server_cert: String,
    temp_files: Vec<NamedTempFile>,
}

impl TlsManager {
    /// The certificate body delivered to clients at login time:
    /// delimiter-stripped PEM, i.e. plain base64 of the DER.
    pub fn server_cert(&self) -> &str {
        &self.server_cert
    }

    pub async fn init(kv: Arc<dyn KvBackend>, listen: &ListenSection) -> anyhow::Result<Self> {
        info!("setting up the TLS infrastructure");
        let mut manager = TlsManager {
            cert_file: PathBuf::new(),
            key_file: PathBuf::new(),
            server_cert: String::new(),
            temp_files: Vec::new(),
        };

        let probe = listen.probe_host.as_str();
        if !probe.is_empty() && probe != "self" {
            info!("probing host {probe} for the CA certificate");
            manager.server_cert = probe_host(probe).await?;
        }

        // Manual mode: certificate management is the operator's problem.
        if listen.certfile != "auto" && listen.keyfile != "auto" {
            info!("using the manually configured TLS certificate and key");
            manager.cert_file = PathBuf::from(&listen.certfile);
            manager.key_file = PathBuf::from(&listen.keyfile);
            if probe == "self" {
                let pem = std::fs::read_to_string(&listen.certfile)
                    .with_context(|| format!("failed to read {}", listen.certfile))?;
                manager.server_cert = cert_body(&pem);
            }
            return Ok(manager);
        }

        let rows = kv.load_table(CERT_STORE_TABLE).await?;
        let mut stored = rows
            .iter()
            .map(|row| TlsData::decode_from_bytes(row))
            .collect::<Result<Vec<_>, _>>()?;
        if stored.len() > 1 {
            bail!("more than one certificate found in the cert store");
        }

        let tls_data = match stored.pop() {
            Some(data) => {
                info!("using the stored TLS parameters");
                data
            }
            None => {
                info!("generating new TLS parameters");
                let data = make_new_cert()?;
                kv.store_values(CERT_STORE_TABLE, vec![data.to_kv_item()?])
                    .await?;
                info!("saved the generated TLS parameters");
                data
            }
        };

        if probe == "self" {
            manager.server_cert = cert_body(&tls_data.cert_data);
        }
        manager.write_out_keys(&tls_data)?;
        Ok(manager)
    }

    fn write_out_keys(&mut self, data: &TlsData) -> anyhow::Result<()> {
        let mut key_file = tempfile::Builder::new()
            .prefix("apollo-key")
            .suffix(".pem")
            .tempfile()
            .context("failed to create the key temp file")?;
        key_file.write_all(data.key_data.as_bytes())?;
        key_file.flush()?;
        self.key_file = key_file.path().to_path_buf();
        self.temp_files.push(key_file);

        let mut cert_file = tempfile::Builder::new()
            .prefix("apollo-cert")
            .suffix(".pem")
            .tempfile()
            .context("failed to create the cert temp file")?;
        cert_file.write_all(data.cert_data.as_bytes())?;
        cert_file.flush()?;
        self.cert_file = cert_file.path().to_path_buf();
        self.temp_files.push(cert_file);
        Ok(())
    }
}

/// Strip the PEM armor, leaving plain base64 of the DER certificate.
fn cert_body(pem: &str) -> String {
    pem.replace("-----BEGIN CERTIFICATE-----", "")
        .replace("-----END CERTIFICATE-----", "")
        .replace(['\r', '\n'], "")
}

/// Connect to a running peer with verification disabled and capture the
/// last certificate of the presented chain.
async fn probe_host(host: &str) -> anyhow::Result<String> {
    let host_port = if host.contains(':') {
        host.to_string()
    } else {
        format!("{host}:443")
    };

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .dangerous()
    .with_custom_certificate_verifier(Arc::new(danger::AcceptAnyCert::new()))
    .with_no_client_auth();

    let stream = TcpStream::connect(&host_port)
        .await
        .with_context(|| format!("failed to reach {host_port}"))?;

    let name = host_port
        .split(':')
        .next()
        .unwrap_or(host)
        .to_string();
    let server_name = rustls::pki_types::ServerName::try_from(name)?;

    let tls = TlsConnector::from(Arc::new(config))
        .connect(server_name, stream)
        .await
        .with_context(|| format!("TLS handshake with {host_port} failed"))?;

    let (_, session) = tls.get_ref();
    let chain = session
        .peer_certificates()
        .ok_or_else(|| anyhow!("no certificate presented by {host_port}"))?;
    let ca = chain
        .last()
        .ok_or_else(|| anyhow!("no certificate presented by {host_port}"))?;
    Ok(STANDARD.encode(ca.as_ref()))
}

/// A fresh ECDSA P-256 self-signed CA for this cluster.
fn make_new_cert() -> anyhow::Result<TlsData> {
    let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;

    let mut params = rcgen::CertificateParams::default();
    let mut dn = rcgen::DistinguishedName::new();
    dn.push(rcgen::DnType::CommonName, "Apollo");
    dn.push(rcgen::DnType::OrganizationName, "Apollo");
    dn.push(rcgen::DnType::CountryName, "N/A");
    params.distinguished_name = dn;
    // The wildcard SAN lets validation go through for any host name.
    params.subject_alt_names = vec![rcgen::SanType::DnsName("*".try_into()?)];
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    params.key_usages = vec![
        rcgen::KeyUsagePurpose::DigitalSignature,
        rcgen::KeyUsagePurpose::KeyCertSign,
    ];
    params.extended_key_usages = vec![
        rcgen::ExtendedKeyUsagePurpose::ClientAuth,
        rcgen::ExtendedKeyUsagePurpose::ServerAuth,
    ];
    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + time::Duration::days(50 * 365);

    let mut serial = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut serial);
    params.serial_number = Some(serial.to_vec().into());

    let cert = params.self_signed(&key_pair)?;
    Ok(TlsData {
        key: "server".to_string(),
        cert_data: cert.pem(),
        key_data: key_pair.serialize_pem(),
    })
}

mod danger {
    use rustls::{
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        crypto::CryptoProvider,
        pki_types::{CertificateDer, ServerName, UnixTime},
        DigitallySignedStruct, SignatureScheme,
    };

    /// Probe-only verifier; the captured certificate is pinned afterwards.
    #[derive(Debug)]
    pub(super) struct AcceptAnyCert(CryptoProvider);

    impl AcceptAnyCert {
        pub(super) fn new() -> Self {
            Self(rustls::crypto::ring::default_provider())
        }
    }

    impl ServerCertVerifier for AcceptAnyCert {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }
}
