//! Command-line argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Offline certificate authority and one-time token tool
///
/// Signs, renews and revokes certificates against a locally loaded CA and
/// mints bootstrap tokens, with no CA server involved.
#[derive(Parser, Debug)]
#[command(name = "offca")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// File containing the password for encrypted keys
    #[arg(long, env = "OFFCA_PASSWORD_FILE", global = true)]
    pub password_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Cryptographic utilities
    Crypto(CryptoArgs),

    /// Offline certificate authority operations
    Ca(CaArgs),
}

// ============================================================================
// crypto
// ============================================================================

#[derive(Args, Debug)]
pub struct CryptoArgs {
    #[command(subcommand)]
    pub command: CryptoCommands,
}

#[derive(Subcommand, Debug)]
pub enum CryptoCommands {
    /// JSON Web Tokens
    Jwt(JwtArgs),
}

#[derive(Args, Debug)]
pub struct JwtArgs {
    #[command(subcommand)]
    pub command: JwtCommands,
}

#[derive(Subcommand, Debug)]
pub enum JwtCommands {
    /// Create a signed JWT from a JSON payload
    Sign(JwtSignArgs),
}

#[derive(Args, Debug)]
pub struct JwtSignArgs {
    /// Payload file; '-' or omitted reads stdin when it is piped
    pub payload: Vec<String>,

    /// Signing key: JWK, JWE-encrypted JWK or PEM private key
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// JWK Set to select the signing key from with '--kid'
    #[arg(long)]
    pub jwks: Option<PathBuf>,

    /// Key id for the header and for '--jwks' selection
    #[arg(long)]
    pub kid: Option<String>,

    /// Signature algorithm (e.g. ES256, RS256, EdDSA)
    #[arg(long)]
    pub alg: Option<String>,

    /// Issuer claim
    #[arg(long)]
    pub iss: Option<String>,

    /// Audience claim; repeat for several audiences
    #[arg(long)]
    pub aud: Vec<String>,

    /// Subject claim
    #[arg(long)]
    pub sub: Option<String>,

    /// Expiration, in seconds since the Unix epoch
    #[arg(long, allow_hyphen_values = true)]
    pub exp: Option<i64>,

    /// Not-before, in seconds since the Unix epoch (default: now)
    #[arg(long, allow_hyphen_values = true)]
    pub nbf: Option<i64>,

    /// Issued-at, in seconds since the Unix epoch (default: now)
    #[arg(long, allow_hyphen_values = true)]
    pub iat: Option<i64>,

    /// Token id; without a value a random one is generated
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    pub jti: Option<String>,

    /// Skip the required-claims and expiry checks
    #[arg(long, hide = true)]
    pub subtle: bool,

    /// Omit the 'kid' header
    #[arg(long, hide = true)]
    pub no_kid: bool,
}

// ============================================================================
// ca
// ============================================================================

#[derive(Args, Debug)]
pub struct CaArgs {
    /// Authority configuration file (ca.json)
    #[arg(long, env = "OFFCA_CA_CONFIG", global = true)]
    pub ca_config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CaCommands,
}

#[derive(Subcommand, Debug)]
pub enum CaCommands {
    /// Create a root, intermediate and JWK provisioner
    Init(InitArgs),

    /// Generate a one-time token
    Token(TokenArgs),

    /// Generate a key pair and obtain a certificate for it
    Certificate(CertificateArgs),

    /// Sign a certificate signing request
    Sign(SignArgs),

    /// Renew a certificate with the same lifetime
    Renew(RenewArgs),

    /// Revoke a certificate (passive: recorded, not published)
    Revoke(RevokeArgs),
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory to create the authority in
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Name used for the CA certificate subjects
    #[arg(long)]
    pub name: String,

    /// DNS names of the authority; repeat for several
    #[arg(long = "dns", required = true)]
    pub dns_names: Vec<String>,

    /// Name of the first JWK provisioner
    #[arg(long, default_value = "admin")]
    pub provisioner: String,
}

/// Provisioner selection and token window shared by token-producing commands.
#[derive(Args, Debug, Clone)]
pub struct ProvisionerArgs {
    /// Provisioner name
    #[arg(long)]
    pub provisioner: Option<String>,

    /// Provisioner key id
    #[arg(long = "provisioner-kid")]
    pub provisioner_kid: Option<String>,

    /// Token not valid before (RFC 3339 time or offset like 5m)
    #[arg(long, allow_hyphen_values = true)]
    pub token_not_before: Option<String>,

    /// Token not valid after (RFC 3339 time or offset like 5m)
    #[arg(long, allow_hyphen_values = true)]
    pub token_not_after: Option<String>,
}

#[derive(Args, Debug)]
pub struct TokenArgs {
    /// Subject of the token: a hostname, or a serial number with '--revoke'
    pub subject: String,

    /// Additional SANs; repeat for several
    #[arg(long)]
    pub san: Vec<String>,

    /// Generate a revoke token instead of a sign token
    #[arg(long)]
    pub revoke: bool,

    /// Write the token to a file instead of stdout
    #[arg(long)]
    pub output_file: Option<PathBuf>,

    #[command(flatten)]
    pub provisioner: ProvisionerArgs,
}

/// Certificate validity requested from the authority.
#[derive(Args, Debug, Clone)]
pub struct ValidityArgs {
    /// Certificate not valid before (RFC 3339 time or offset)
    #[arg(long, allow_hyphen_values = true)]
    pub not_before: Option<String>,

    /// Certificate not valid after (RFC 3339 time or offset like 24h)
    #[arg(long, allow_hyphen_values = true)]
    pub not_after: Option<String>,
}

#[derive(Args, Debug)]
pub struct CertificateArgs {
    /// Common name of the certificate
    pub subject: String,

    /// Where to write the certificate chain
    pub crt_file: PathBuf,

    /// Where to write the private key
    pub key_file: PathBuf,

    /// SANs; defaults to the subject
    #[arg(long)]
    pub san: Vec<String>,

    /// Existing one-time token instead of generating one
    #[arg(long)]
    pub token: Option<String>,

    /// Overwrite existing files
    #[arg(short, long)]
    pub force: bool,

    #[command(flatten)]
    pub validity: ValidityArgs,

    #[command(flatten)]
    pub provisioner: ProvisionerArgs,
}

#[derive(Args, Debug)]
pub struct SignArgs {
    /// PEM certificate signing request
    pub csr_file: PathBuf,

    /// Where to write the certificate chain
    pub crt_file: PathBuf,

    /// Existing one-time token instead of generating one
    #[arg(long)]
    pub token: Option<String>,

    /// Overwrite an existing certificate file
    #[arg(short, long)]
    pub force: bool,

    #[command(flatten)]
    pub validity: ValidityArgs,

    #[command(flatten)]
    pub provisioner: ProvisionerArgs,
}

#[derive(Args, Debug)]
pub struct RenewArgs {
    /// Certificate to renew
    pub crt_file: PathBuf,

    /// Its private key
    pub key_file: PathBuf,

    /// Where to write the renewed chain (default: replace the certificate)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Overwrite without asking
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct RevokeArgs {
    /// Decimal serial number; read from '--cert' when omitted
    pub serial: Option<String>,

    /// Revoke token; generated when neither it nor '--cert' is given
    #[arg(long)]
    pub token: Option<String>,

    /// Certificate authorizing the revocation over mTLS
    #[arg(long, requires = "key")]
    pub cert: Option<PathBuf>,

    /// Private key of '--cert'
    #[arg(long, requires = "cert")]
    pub key: Option<PathBuf>,

    /// RFC 5280 reason code (0-6, 8-10)
    #[arg(long, default_value_t = 0)]
    pub reason_code: i32,

    /// Free-form reason
    #[arg(long, default_value = "")]
    pub reason: String,

    #[command(flatten)]
    pub provisioner: ProvisionerArgs,
}
