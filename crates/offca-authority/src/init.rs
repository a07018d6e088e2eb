//! Bootstrap a new authority on disk.
//!
//! Creates an EC P-256 root and intermediate, encrypts both keys with the
//! given password, generates a JWK provisioner whose private key is a JWE
//! under the same password, and writes a configuration that
//! [`crate::OfflineCa::load`] accepts.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use openssl::pkey::{PKey, Private};
use openssl::symm::Cipher;
use tracing::info;

use offca_core::config::{AuthConfig, AuthorityConfig};
use offca_core::jose::{jwe, Jwk};
use offca_core::provisioner::{JwkProvisioner, Provisioner};
use offca_core::{OffcaError, Result};

use crate::pool;
use crate::x509::{generate_key, issue_ca};

pub const CONFIG_FILE: &str = "config/ca.json";
pub const ROOT_CERT_FILE: &str = "certs/root_ca.crt";
pub const ROOT_KEY_FILE: &str = "secrets/root_ca_key";
pub const INTERMEDIATE_CERT_FILE: &str = "certs/intermediate_ca.crt";
pub const INTERMEDIATE_KEY_FILE: &str = "secrets/intermediate_ca_key";

#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Prefix of the CA common names
    pub name: String,
    pub dns_names: Vec<String>,
    /// Name of the generated JWK provisioner
    pub provisioner: String,
    pub root_validity: Duration,
    pub intermediate_validity: Duration,
}

impl InitOptions {
    pub fn new(name: impl Into<String>, dns_names: Vec<String>, provisioner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dns_names,
            provisioner: provisioner.into(),
            root_validity: Duration::days(3650),
            intermediate_validity: Duration::days(3650),
        }
    }
}

/// Where `init` put things.
#[derive(Debug, Clone)]
pub struct InitOutput {
    pub config: PathBuf,
    pub root_cert: PathBuf,
    pub intermediate_cert: PathBuf,
    pub intermediate_key: PathBuf,
    pub root_fingerprint: String,
    /// `name:kid` of the generated provisioner
    pub provisioner_id: String,
}

/// Create a new authority under `dir`.
pub fn init(dir: &Path, options: &InitOptions, password: &[u8]) -> Result<InitOutput> {
    if options.dns_names.iter().all(String::is_empty) {
        return Err(OffcaError::Usage("at least one DNS name is required".to_string()));
    }
    if password.is_empty() {
        return Err(OffcaError::Usage("password cannot be empty".to_string()));
    }
    for sub in ["certs", "secrets", "config"] {
        create_dir(&dir.join(sub))?;
    }
    let dir = dir
        .canonicalize()
        .map_err(|e| OffcaError::Config(format!("error reading {}: {e}", dir.display())))?;

    let root_key = generate_key()?;
    let root = issue_ca(
        &format!("{} Root CA", options.name),
        &root_key,
        None,
        1,
        options.root_validity,
    )?;
    let intermediate_key = generate_key()?;
    let intermediate = issue_ca(
        &format!("{} Intermediate CA", options.name),
        &intermediate_key,
        Some((&*root, &*root_key)),
        0,
        options.intermediate_validity,
    )?;

    let root_cert_path = dir.join(ROOT_CERT_FILE);
    let intermediate_cert_path = dir.join(INTERMEDIATE_CERT_FILE);
    let intermediate_key_path = dir.join(INTERMEDIATE_KEY_FILE);
    write_file(&root_cert_path, &to_pem(root.to_pem())?, false)?;
    write_file(&intermediate_cert_path, &to_pem(intermediate.to_pem())?, false)?;
    write_file(&dir.join(ROOT_KEY_FILE), &encrypt_key(&root_key, password)?, true)?;
    write_file(&intermediate_key_path, &encrypt_key(&intermediate_key, password)?, true)?;

    let key = Jwk::generate_p256()?;
    let plaintext = serde_json::to_vec(&key)?;
    let provisioner = JwkProvisioner {
        name: options.provisioner.clone(),
        key: key.public(),
        encrypted_key: jwe::encrypt(&plaintext, password, Some("jwk+json"))?,
        claims: None,
    };
    let provisioner = Provisioner::Jwk(provisioner);
    let provisioner_id = provisioner.id();

    let config = AuthorityConfig {
        dns_names: options.dns_names.clone(),
        root: vec![root_cert_path.clone()],
        intermediate_cert: intermediate_cert_path.clone(),
        intermediate_key: intermediate_key_path.clone(),
        password: None,
        authority_config: AuthConfig {
            provisioners: vec![provisioner],
            claims: None,
        },
        tls: None,
    };
    let config_path = dir.join(CONFIG_FILE);
    write_file(&config_path, &serde_json::to_vec_pretty(&config)?, false)?;

    let root_fingerprint = pool::fingerprint(&root)?;
    info!(
        dir = %dir.display(),
        fingerprint = %root_fingerprint,
        provisioner = %provisioner_id,
        "authority initialized"
    );
    Ok(InitOutput {
        config: config_path,
        root_cert: root_cert_path,
        intermediate_cert: intermediate_cert_path,
        intermediate_key: intermediate_key_path,
        root_fingerprint,
        provisioner_id,
    })
}

fn to_pem(pem: std::result::Result<Vec<u8>, openssl::error::ErrorStack>) -> Result<Vec<u8>> {
    pem.map_err(|e| OffcaError::Signing(format!("error encoding certificate: {e}")))
}

fn encrypt_key(key: &PKey<Private>, password: &[u8]) -> Result<Vec<u8>> {
    key.private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), password)
        .map_err(|e| OffcaError::Signing(format!("error encrypting key: {e}")))
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .map_err(|e| OffcaError::Config(format!("error creating {}: {e}", path.display())))
}

fn write_file(path: &Path, data: &[u8], secret: bool) -> Result<()> {
    let failed = |e: std::io::Error| OffcaError::Config(format!("error writing {}: {e}", path.display()));
    fs::write(path, data).map_err(failed)?;
    if secret {
        restrict(path).map_err(failed)?;
    }
    Ok(())
}

#[cfg(unix)]
fn restrict(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
