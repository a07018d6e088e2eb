//! X.509 certificate and request construction.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, PKeyRef, Private, Public};
use openssl::stack::Stack;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509Name, X509NameRef, X509Ref, X509Req, X509ReqBuilder, X509VerifyResult, X509};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::FromDer;

use offca_core::{OffcaError, Result};

fn signing(e: impl fmt::Display) -> OffcaError {
    OffcaError::Signing(format!("error creating certificate: {e}"))
}

fn invalid_request(e: impl fmt::Display) -> OffcaError {
    OffcaError::Validation(format!("invalid certificate request: {e}"))
}

/// A subject alternative name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum San {
    Dns(String),
    Ip(IpAddr),
    Email(String),
    Uri(String),
}

impl San {
    /// Classify a name given on the command line or in a token.
    #[must_use]
    pub fn classify(value: &str) -> Self {
        if let Ok(ip) = value.parse::<IpAddr>() {
            Self::Ip(ip)
        } else if value.contains("://") {
            Self::Uri(value.to_string())
        } else if value.contains('@') {
            Self::Email(value.to_string())
        } else {
            Self::Dns(value.to_string())
        }
    }
}

impl fmt::Display for San {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns(v) | Self::Email(v) | Self::Uri(v) => f.write_str(v),
            Self::Ip(ip) => write!(f, "{ip}"),
        }
    }
}

/// The parts of a certificate request the authority acts on.
pub struct CsrInfo {
    pub request: X509Req,
    pub common_name: Option<String>,
    pub sans: Vec<San>,
    pub public_key: PKey<Public>,
}

/// Parse a PEM certificate request and check its self-signature.
pub fn inspect_csr(pem: &str) -> Result<CsrInfo> {
    let request = X509Req::from_pem(pem.as_bytes()).map_err(invalid_request)?;
    let public_key = request.public_key().map_err(invalid_request)?;
    if !request.verify(&public_key).map_err(invalid_request)? {
        return Err(invalid_request("signature does not match the public key"));
    }

    let common_name = common_name(request.subject_name());
    let der = request.to_der().map_err(invalid_request)?;
    let (_, parsed) = X509CertificationRequest::from_der(&der).map_err(invalid_request)?;

    let mut sans = Vec::new();
    if let Some(extensions) = parsed.requested_extensions() {
        for extension in extensions {
            if let ParsedExtension::SubjectAlternativeName(names) = extension {
                for name in &names.general_names {
                    if let Some(san) = from_general_name(name) {
                        sans.push(san);
                    }
                }
            }
        }
    }

    Ok(CsrInfo {
        request,
        common_name,
        sans,
        public_key,
    })
}

fn from_general_name(name: &GeneralName<'_>) -> Option<San> {
    match name {
        GeneralName::DNSName(v) => Some(San::Dns((*v).to_string())),
        GeneralName::RFC822Name(v) => Some(San::Email((*v).to_string())),
        GeneralName::URI(v) => Some(San::Uri((*v).to_string())),
        GeneralName::IPAddress(bytes) => match bytes.len() {
            4 => <[u8; 4]>::try_from(*bytes).ok().map(|b| San::Ip(IpAddr::from(b))),
            16 => <[u8; 16]>::try_from(*bytes).ok().map(|b| San::Ip(IpAddr::from(b))),
            _ => None,
        },
        _ => None,
    }
}

/// First common name entry of `name`.
#[must_use]
pub fn common_name(name: &X509NameRef) -> Option<String> {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|cn| cn.to_string())
}

/// SANs carried by an issued certificate.
#[must_use]
pub fn certificate_sans(cert: &X509Ref) -> Vec<San> {
    let Some(names) = cert.subject_alt_names() else {
        return Vec::new();
    };
    names
        .iter()
        .filter_map(|name| {
            if let Some(dns) = name.dnsname() {
                Some(San::Dns(dns.to_string()))
            } else if let Some(email) = name.email() {
                Some(San::Email(email.to_string()))
            } else if let Some(uri) = name.uri() {
                Some(San::Uri(uri.to_string()))
            } else {
                name.ipaddress().and_then(|bytes| match bytes.len() {
                    4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
                    16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
                    _ => None,
                })
                .map(San::Ip)
            }
        })
        .collect()
}

/// What goes into a leaf certificate.
pub struct LeafTemplate<'a> {
    pub common_name: &'a str,
    pub sans: &'a [San],
    pub public_key: &'a PKeyRef<Public>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// Issue a TLS leaf certificate signed by `issuer`.
pub fn issue_leaf(
    template: &LeafTemplate<'_>,
    issuer: &X509Ref,
    issuer_key: &PKeyRef<Private>,
) -> Result<X509> {
    let mut builder = X509::builder().map_err(signing)?;
    builder.set_version(2).map_err(signing)?;
    let serial = random_serial()?;
    builder.set_serial_number(&serial).map_err(signing)?;

    let subject = name_with_cn(template.common_name)?;
    builder.set_subject_name(&subject).map_err(signing)?;
    builder
        .set_issuer_name(issuer.subject_name())
        .map_err(signing)?;
    builder.set_pubkey(template.public_key).map_err(signing)?;
    builder
        .set_not_before(asn1_time(template.not_before)?.as_ref())
        .map_err(signing)?;
    builder
        .set_not_after(asn1_time(template.not_after)?.as_ref())
        .map_err(signing)?;

    builder
        .append_extension(BasicConstraints::new().critical().build().map_err(signing)?)
        .map_err(signing)?;
    builder
        .append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()
                .map_err(signing)?,
        )
        .map_err(signing)?;
    builder
        .append_extension(
            ExtendedKeyUsage::new()
                .server_auth()
                .client_auth()
                .build()
                .map_err(signing)?,
        )
        .map_err(signing)?;

    let ski = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(Some(issuer), None))
        .map_err(signing)?;
    builder.append_extension(ski).map_err(signing)?;
    let aki = AuthorityKeyIdentifier::new()
        .keyid(false)
        .build(&builder.x509v3_context(Some(issuer), None))
        .map_err(signing)?;
    builder.append_extension(aki).map_err(signing)?;

    if !template.sans.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for name in template.sans {
            match name {
                San::Dns(v) => san.dns(v),
                San::Email(v) => san.email(v),
                San::Uri(v) => san.uri(v),
                San::Ip(ip) => san.ip(&ip.to_string()),
            };
        }
        let san = san
            .build(&builder.x509v3_context(Some(issuer), None))
            .map_err(signing)?;
        builder.append_extension(san).map_err(signing)?;
    }

    builder
        .sign(issuer_key, digest_for(issuer_key))
        .map_err(signing)?;
    Ok(builder.build())
}

/// Issue a CA certificate. Without an issuer the certificate is self-signed.
pub fn issue_ca(
    common_name: &str,
    key: &PKeyRef<Private>,
    issuer: Option<(&X509Ref, &PKeyRef<Private>)>,
    path_len: u32,
    validity: Duration,
) -> Result<X509> {
    let mut builder = X509::builder().map_err(signing)?;
    builder.set_version(2).map_err(signing)?;
    let serial = random_serial()?;
    builder.set_serial_number(&serial).map_err(signing)?;

    let subject = name_with_cn(common_name)?;
    builder.set_subject_name(&subject).map_err(signing)?;
    let issuer_name: &X509NameRef = match issuer {
        Some((cert, _)) => cert.subject_name(),
        None => &subject,
    };
    builder.set_issuer_name(issuer_name).map_err(signing)?;
    builder.set_pubkey(key).map_err(signing)?;

    let now = Utc::now();
    builder
        .set_not_before(asn1_time(now)?.as_ref())
        .map_err(signing)?;
    builder
        .set_not_after(asn1_time(now + validity)?.as_ref())
        .map_err(signing)?;

    builder
        .append_extension(
            BasicConstraints::new()
                .critical()
                .ca()
                .pathlen(path_len)
                .build()
                .map_err(signing)?,
        )
        .map_err(signing)?;
    builder
        .append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .build()
                .map_err(signing)?,
        )
        .map_err(signing)?;

    let issuer_cert = issuer.map(|(cert, _)| cert);
    let ski = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(issuer_cert, None))
        .map_err(signing)?;
    builder.append_extension(ski).map_err(signing)?;
    if let Some(cert) = issuer_cert {
        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&builder.x509v3_context(Some(cert), None))
            .map_err(signing)?;
        builder.append_extension(aki).map_err(signing)?;
    }

    let signer = issuer.map_or(key, |(_, issuer_key)| issuer_key);
    builder.sign(signer, digest_for(signer)).map_err(signing)?;
    Ok(builder.build())
}

/// A new EC P-256 key.
pub fn generate_key() -> Result<PKey<Private>> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).map_err(signing)?;
    let key = EcKey::generate(&group).map_err(signing)?;
    PKey::from_ec_key(key).map_err(signing)
}

/// Build a signed certificate request for `subject` with `sans`.
pub fn create_csr(subject: &str, sans: &[San], key: &PKeyRef<Private>) -> Result<X509Req> {
    let mut builder = X509ReqBuilder::new().map_err(signing)?;
    builder.set_version(0).map_err(signing)?;
    let name = name_with_cn(subject)?;
    builder.set_subject_name(&name).map_err(signing)?;
    builder.set_pubkey(key).map_err(signing)?;

    if !sans.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for name in sans {
            match name {
                San::Dns(v) => san.dns(v),
                San::Email(v) => san.email(v),
                San::Uri(v) => san.uri(v),
                San::Ip(ip) => san.ip(&ip.to_string()),
            };
        }
        let extension = san
            .build(&builder.x509v3_context(None))
            .map_err(signing)?;
        let mut extensions = Stack::new().map_err(signing)?;
        extensions.push(extension).map_err(signing)?;
        builder.add_extensions(&extensions).map_err(signing)?;
    }

    builder.sign(key, digest_for(key)).map_err(signing)?;
    Ok(builder.build())
}

/// Decimal serial number, the form used by revocation requests.
pub fn serial_string(cert: &X509Ref) -> Result<String> {
    let serial = cert
        .serial_number()
        .to_bn()
        .and_then(|bn| bn.to_dec_str().map(|s| s.to_string()))
        .map_err(|e| OffcaError::Validation(format!("error reading serial number: {e}")))?;
    Ok(serial)
}

/// Whether `issuer` signed `cert`.
#[must_use]
pub fn issued_by(cert: &X509Ref, issuer: &X509Ref) -> bool {
    if issuer.issued(cert) != X509VerifyResult::OK {
        return false;
    }
    issuer
        .public_key()
        .and_then(|key| cert.verify(&key))
        .unwrap_or(false)
}

/// Validity window of a certificate.
pub fn validity(cert: &X509Ref) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    Ok((to_datetime(cert.not_before())?, to_datetime(cert.not_after())?))
}

fn to_datetime(time: &Asn1TimeRef) -> Result<DateTime<Utc>> {
    let bad = |e: openssl::error::ErrorStack| OffcaError::Validation(format!("invalid certificate time: {e}"));
    let epoch = Asn1Time::from_unix(0).map_err(bad)?;
    let diff = epoch.diff(time).map_err(bad)?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| OffcaError::Validation(format!("certificate time out of range: {time}")))
}

fn asn1_time(time: DateTime<Utc>) -> Result<Asn1Time> {
    Asn1Time::from_unix(time.timestamp()).map_err(signing)
}

fn random_serial() -> Result<openssl::asn1::Asn1Integer> {
    let mut serial = BigNum::new().map_err(signing)?;
    serial
        .rand(128, MsbOption::MAYBE_ZERO, false)
        .map_err(signing)?;
    serial.to_asn1_integer().map_err(signing)
}

fn name_with_cn(common_name: &str) -> Result<X509Name> {
    let mut name = X509Name::builder().map_err(signing)?;
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)
        .map_err(signing)?;
    Ok(name.build())
}

fn digest_for<T: openssl::pkey::HasPublic>(key: &PKeyRef<T>) -> MessageDigest {
    match key.id() {
        Id::ED25519 | Id::ED448 => MessageDigest::null(),
        Id::EC => match key.ec_key().ok().and_then(|ec| ec.group().curve_name()) {
            Some(Nid::SECP384R1) => MessageDigest::sha384(),
            Some(Nid::SECP521R1) => MessageDigest::sha512(),
            _ => MessageDigest::sha256(),
        },
        _ => MessageDigest::sha256(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ca() -> (X509, PKey<Private>) {
        let key = generate_key().unwrap();
        let cert = issue_ca("Test Root CA", &key, None, 1, Duration::days(1)).unwrap();
        (cert, key)
    }

    #[test]
    fn classifies_sans() {
        assert_eq!(San::classify("10.0.0.1"), San::Ip("10.0.0.1".parse().unwrap()));
        assert_eq!(San::classify("::1"), San::Ip("::1".parse().unwrap()));
        assert_eq!(San::classify("ops@example.com"), San::Email("ops@example.com".into()));
        assert_eq!(
            San::classify("spiffe://example.com/web"),
            San::Uri("spiffe://example.com/web".into())
        );
        assert_eq!(San::classify("example.com"), San::Dns("example.com".into()));
    }

    #[test]
    fn csr_round_trips_subject_and_sans() {
        let key = generate_key().unwrap();
        let sans = vec![San::classify("web.internal"), San::classify("10.1.2.3")];
        let csr = create_csr("web.internal", &sans, &key).unwrap();
        let pem = String::from_utf8(csr.to_pem().unwrap()).unwrap();

        let info = inspect_csr(&pem).unwrap();
        assert_eq!(info.common_name.as_deref(), Some("web.internal"));
        assert_eq!(info.sans, sans);
    }

    #[test]
    fn garbage_csr_is_rejected() {
        let err = inspect_csr("not a csr").err().unwrap();
        assert!(matches!(err, OffcaError::Validation(_)));
    }

    #[test]
    fn leaf_carries_template() {
        let (root, root_key) = ca();
        let key = generate_key().unwrap();
        let public = PKey::public_key_from_pem(&key.public_key_to_pem().unwrap()).unwrap();
        let now = Utc::now();
        let sans = vec![San::classify("svc.local")];
        let leaf = issue_leaf(
            &LeafTemplate {
                common_name: "svc.local",
                sans: &sans,
                public_key: &public,
                not_before: now,
                not_after: now + Duration::hours(1),
            },
            &root,
            &root_key,
        )
        .unwrap();

        assert!(issued_by(&leaf, &root));
        assert_eq!(common_name(leaf.subject_name()).as_deref(), Some("svc.local"));
        assert_eq!(certificate_sans(&leaf), sans);
        let (nbf, naf) = validity(&leaf).unwrap();
        assert_eq!(nbf.timestamp(), now.timestamp());
        assert_eq!((naf - nbf).num_seconds(), 3600);
        assert!(serial_string(&leaf).unwrap().chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn foreign_issuer_is_detected() {
        let (root, _) = ca();
        let (other, _) = ca();
        assert!(!issued_by(&root, &other));
        assert!(issued_by(&root, &root));
    }
}
