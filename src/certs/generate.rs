//! Self-signed certificate generation for local runs and tests
//!
//! ## Certificate Chain
//! ```text
//! Self-signed CA (demo-service-dev-ca)
//!     ├── Server cert (SANs from the requested hostnames)
//!     └── Client cert (for exercising mutual TLS)
//! ```

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType,
};
use std::net::IpAddr;
use thiserror::Error;

/// Default validity period for the development CA (10 years)
pub const CA_VALIDITY_DAYS: u32 = 3650;

/// Default validity period for leaf certificates (1 year)
pub const LEAF_VALIDITY_DAYS: u32 = 365;

/// OU of the generated client certificate unless another is asked for
pub const DEFAULT_CLIENT_OU: &str = "engineering";

/// Errors that can occur while generating certificates
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Failed to generate certificate: {0}")]
    KeyGeneration(#[from] rcgen::Error),

    #[error("Invalid hostname '{0}'")]
    InvalidHostname(String),

    #[error("At least one hostname is required")]
    NoHostnames,
}

/// PEM output of [`generate_dev_certificates`]
#[derive(Clone)]
pub struct DevCertificates {
    pub ca_cert_pem: String,
    pub server_cert_pem: String,
    pub server_key_pem: String,
    pub client_cert_pem: String,
    pub client_key_pem: String,
}

fn validity(params: &mut CertificateParams, days: u32) {
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(i64::from(days));
}

fn generate_ca() -> Result<(Certificate, KeyPair), GenerateError> {
    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, "demo-service-dev-ca");
    params
        .distinguished_name
        .push(DnType::OrganizationName, "demo-service");

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    validity(&mut params, CA_VALIDITY_DAYS);

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;
    Ok((cert, key_pair))
}

fn subject_alt_name(hostname: &str) -> Result<SanType, GenerateError> {
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return Ok(SanType::IpAddress(ip));
    }
    hostname
        .try_into()
        .map(SanType::DnsName)
        .map_err(|_| GenerateError::InvalidHostname(hostname.to_string()))
}

fn generate_server_cert(
    ca_cert: &Certificate,
    ca_key: &KeyPair,
    hostnames: &[String],
) -> Result<(String, String), GenerateError> {
    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, hostnames[0].as_str());
    params
        .distinguished_name
        .push(DnType::OrganizationName, "demo-service");

    params.subject_alt_names = hostnames
        .iter()
        .map(|h| subject_alt_name(h))
        .collect::<Result<Vec<_>, _>>()?;

    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    validity(&mut params, LEAF_VALIDITY_DAYS);

    let key_pair = KeyPair::generate()?;
    let cert = params.signed_by(&key_pair, ca_cert, ca_key)?;
    Ok((cert.pem(), key_pair.serialize_pem()))
}

fn generate_client_cert(
    ca_cert: &Certificate,
    ca_key: &KeyPair,
    organizational_unit: &str,
) -> Result<(String, String), GenerateError> {
    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, "demo-service-dev-client");
    params
        .distinguished_name
        .push(DnType::OrganizationalUnitName, organizational_unit);

    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    validity(&mut params, LEAF_VALIDITY_DAYS);

    let key_pair = KeyPair::generate()?;
    let cert = params.signed_by(&key_pair, ca_cert, ca_key)?;
    Ok((cert.pem(), key_pair.serialize_pem()))
}

/// Generate a CA plus server and client certificates signed by it
///
/// The first hostname becomes the server certificate's common name; every
/// hostname (DNS name or IP literal) is added as a subject alternative name.
/// The client certificate carries [`DEFAULT_CLIENT_OU`].
pub fn generate_dev_certificates(hostnames: &[String]) -> Result<DevCertificates, GenerateError> {
    generate_dev_certificates_with_ou(hostnames, DEFAULT_CLIENT_OU)
}

/// Like [`generate_dev_certificates`], with the client certificate's OU chosen
pub fn generate_dev_certificates_with_ou(
    hostnames: &[String],
    client_ou: &str,
) -> Result<DevCertificates, GenerateError> {
    if hostnames.is_empty() {
        return Err(GenerateError::NoHostnames);
    }

    let (ca_cert, ca_key) = generate_ca()?;
    let (server_cert_pem, server_key_pem) = generate_server_cert(&ca_cert, &ca_key, hostnames)?;
    let (client_cert_pem, client_key_pem) = generate_client_cert(&ca_cert, &ca_key, client_ou)?;

    Ok(DevCertificates {
        ca_cert_pem: ca_cert.pem(),
        server_cert_pem,
        server_key_pem,
        client_cert_pem,
        client_key_pem,
    })
}
