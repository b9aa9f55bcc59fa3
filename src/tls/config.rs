//! TLS endpoint configuration
//!
//! This module builds the immutable [`EndpointConfig`] used for every
//! handshake of an endpoint, from its role, trust anchors, local identity
//! and verification policy.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use openssl::error::ErrorStack;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{SslContext, SslContextBuilder, SslMethod, SslVerifyMode, SslVersion};
use openssl::x509::store::{X509Store, X509StoreBuilder};
use openssl::x509::X509;
use tracing::debug;

use super::handshake::DEFAULT_HANDSHAKE_TIMEOUT_SECS;

/// Endpoint role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates the handshake
    Client,
    /// Responds to the handshake and always presents a certificate
    Server,
}

impl Role {
    /// Get role as string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Peer certificate verification mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerVerify {
    /// Don't verify the peer (server: don't request client certificates)
    None,
    /// Verify a certificate if the peer presents one
    Optional,
    /// The peer must present a certificate chaining to the trust store
    Required,
}

impl PeerVerify {
    /// Get mode as string
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerVerify::None => "none",
            PeerVerify::Optional => "optional",
            PeerVerify::Required => "required",
        }
    }
}

impl FromStr for PeerVerify {
    type Err = ConfigError;

    /// Parse verification mode (case-insensitive)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(PeerVerify::None),
            "optional" => Ok(PeerVerify::Optional),
            "required" => Ok(PeerVerify::Required),
            _ => Err(ConfigError::InvalidPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for PeerVerify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verification policy of an endpoint
///
/// `hostname_check` only applies to the client role: the server certificate
/// must then be valid for the server name the client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationPolicy {
    pub peer: PeerVerify,
    pub hostname_check: bool,
}

impl VerificationPolicy {
    /// No peer verification at all
    pub const fn none() -> Self {
        VerificationPolicy {
            peer: PeerVerify::None,
            hostname_check: false,
        }
    }

    /// Verify the peer certificate when one is presented
    pub const fn optional() -> Self {
        VerificationPolicy {
            peer: PeerVerify::Optional,
            hostname_check: true,
        }
    }

    /// Require a verified peer certificate
    pub const fn required() -> Self {
        VerificationPolicy {
            peer: PeerVerify::Required,
            hostname_check: true,
        }
    }

    /// Enable/disable the server hostname check
    pub const fn with_hostname_check(mut self, enabled: bool) -> Self {
        self.hostname_check = enabled;
        self
    }

    /// Whether the hostname check actually runs (requires chain verification)
    pub fn verifies_hostname(&self) -> bool {
        self.hostname_check && self.peer != PeerVerify::None
    }
}

impl From<PeerVerify> for VerificationPolicy {
    fn from(peer: PeerVerify) -> Self {
        match peer {
            PeerVerify::None => VerificationPolicy::none(),
            PeerVerify::Optional => VerificationPolicy::optional(),
            PeerVerify::Required => VerificationPolicy::required(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing trust anchor: peer verification needs a CA bundle")]
    MissingTrustAnchor,

    #[error("Missing identity: a server must present a certificate and key")]
    MissingIdentity,

    #[error("Unreadable key material: {0}")]
    UnreadableKeyMaterial(String),

    #[error("Invalid verification policy: {0}")]
    InvalidPolicy(String),

    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>, ConfigError> {
    fs::read(path).map_err(|e| {
        ConfigError::UnreadableKeyMaterial(format!("{} {}: {}", what, path.display(), e))
    })
}

/// Trusted CA certificates used to validate a peer chain
#[derive(Clone)]
pub struct TrustStore {
    certs: Vec<X509>,
}

impl TrustStore {
    /// Parse a PEM bundle of CA certificates
    pub fn from_pem(pem: &[u8]) -> Result<Self, ConfigError> {
        let certs = X509::stack_from_pem(pem).map_err(|e| {
            ConfigError::UnreadableKeyMaterial(format!("Failed to parse CA bundle: {}", e))
        })?;

        if certs.is_empty() {
            return Err(ConfigError::UnreadableKeyMaterial(
                "CA bundle contains no certificates".to_string(),
            ));
        }

        Ok(TrustStore { certs })
    }

    /// Load a PEM bundle of CA certificates from a file
    pub fn from_pem_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let pem = read_pem(path.as_ref(), "CA bundle")?;
        Self::from_pem(&pem)
    }

    /// Trusted certificates, in bundle order
    pub fn certificates(&self) -> &[X509] {
        &self.certs
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    fn to_x509_store(&self) -> Result<X509Store, ErrorStack> {
        let mut builder = X509StoreBuilder::new()?;
        for cert in &self.certs {
            builder.add_cert(cert.clone())?;
        }
        Ok(builder.build())
    }
}

impl fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subjects: Vec<String> = self
            .certs
            .iter()
            .map(|c| super::cert::DistinguishedName::from_x509_name(c.subject_name()).to_string())
            .collect();
        f.debug_struct("TrustStore").field("subjects", &subjects).finish()
    }
}

/// Certificate chain and matching private key of this endpoint
#[derive(Clone)]
pub struct LocalIdentity {
    leaf: X509,
    chain: Vec<X509>,
    key: PKey<Private>,
}

impl LocalIdentity {
    /// Parse a PEM certificate chain (leaf first) and a PEM private key
    ///
    /// Fails with `UnreadableKeyMaterial` if either does not parse or the key
    /// does not match the leaf certificate's public key.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, ConfigError> {
        let mut certs = X509::stack_from_pem(cert_pem)
            .map_err(|e| {
                ConfigError::UnreadableKeyMaterial(format!("Failed to load certificate: {}", e))
            })?
            .into_iter();

        let leaf = certs.next().ok_or_else(|| {
            ConfigError::UnreadableKeyMaterial("Certificate file contains no certificate".to_string())
        })?;
        let chain = certs.collect();

        let key = PKey::private_key_from_pem(key_pem).map_err(|e| {
            ConfigError::UnreadableKeyMaterial(format!("Failed to load private key: {}", e))
        })?;

        let public = leaf.public_key().map_err(|e| {
            ConfigError::UnreadableKeyMaterial(format!("Failed to read certificate public key: {}", e))
        })?;
        if !public.public_eq(&*key) {
            return Err(ConfigError::UnreadableKeyMaterial(
                "Private key does not match the certificate public key".to_string(),
            ));
        }

        Ok(LocalIdentity { leaf, chain, key })
    }

    /// Load a PEM certificate chain and private key from two files
    pub fn from_pem_files<C, K>(cert_path: C, key_path: K) -> Result<Self, ConfigError>
    where
        C: AsRef<Path>,
        K: AsRef<Path>,
    {
        let cert_pem = read_pem(cert_path.as_ref(), "certificate")?;
        let key_pem = read_pem(key_path.as_ref(), "private key")?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Leaf certificate
    pub fn certificate(&self) -> &X509 {
        &self.leaf
    }

    /// Intermediate certificates sent after the leaf
    pub fn chain(&self) -> &[X509] {
        &self.chain
    }
}

impl fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subject = super::cert::DistinguishedName::from_x509_name(self.leaf.subject_name());
        f.debug_struct("LocalIdentity")
            .field("subject", &subject.to_string())
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// TLS endpoint configuration (immutable after building)
#[derive(Clone)]
pub struct EndpointConfig {
    pub(crate) ctx: SslContext,
    role: Role,
    policy: VerificationPolicy,
    handshake_timeout: Option<Duration>,
}

impl EndpointConfig {
    /// Create a new client configuration builder
    pub fn client() -> EndpointConfigBuilder {
        EndpointConfigBuilder::new(Role::Client)
    }

    /// Create a new server configuration builder
    pub fn server() -> EndpointConfigBuilder {
        EndpointConfigBuilder::new(Role::Server)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn policy(&self) -> VerificationPolicy {
        self.policy
    }

    /// Socket timeout applied to the handshake and the session I/O
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout
    }

    /// Replace the handshake timeout (`None` blocks indefinitely)
    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("role", &self.role)
            .field("policy", &self.policy)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

/// Build an endpoint configuration
///
/// The trust store is mandatory unless `policy.peer` is `None`; the local
/// identity is mandatory for the server role. Only reads what it is handed,
/// no network resource is touched.
pub fn configure(
    role: Role,
    trust_store: Option<&TrustStore>,
    identity: Option<&LocalIdentity>,
    policy: VerificationPolicy,
) -> Result<EndpointConfig, ConfigError> {
    if policy.peer != PeerVerify::None && trust_store.is_none() {
        return Err(ConfigError::MissingTrustAnchor);
    }
    if role == Role::Server && identity.is_none() {
        return Err(ConfigError::MissingIdentity);
    }

    let method = match role {
        Role::Client => SslMethod::tls_client(),
        Role::Server => SslMethod::tls_server(),
    };
    let mut builder = SslContextBuilder::new(method)?;
    builder.set_min_proto_version(Some(SslVersion::TLS1_2))?;

    if let Some(store) = trust_store {
        builder.set_cert_store(store.to_x509_store()?);

        // Tell clients which CAs we accept so they can pick a certificate
        if role == Role::Server && policy.peer != PeerVerify::None {
            for ca in store.certificates() {
                builder.add_client_ca(ca)?;
            }
        }
    }

    if let Some(identity) = identity {
        load_identity(&mut builder, identity)?;
    }

    builder.set_verify(verify_mode(role, policy.peer));

    debug!(
        role = %role,
        peer_verify = %policy.peer,
        hostname_check = policy.hostname_check,
        trust_anchors = trust_store.map_or(0, TrustStore::len),
        has_identity = identity.is_some(),
        "TLS endpoint configured"
    );

    Ok(EndpointConfig {
        ctx: builder.build(),
        role,
        policy,
        handshake_timeout: Some(Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS)),
    })
}

fn load_identity(builder: &mut SslContextBuilder, identity: &LocalIdentity) -> Result<(), ConfigError> {
    builder.set_certificate(&identity.leaf)?;
    for cert in &identity.chain {
        builder.add_extra_chain_cert(cert.clone())?;
    }
    builder.set_private_key(&identity.key)?;
    builder.check_private_key().map_err(|e| {
        ConfigError::UnreadableKeyMaterial(format!("Private key check failed: {}", e))
    })
}

fn verify_mode(role: Role, peer: PeerVerify) -> SslVerifyMode {
    match (role, peer) {
        (_, PeerVerify::None) => SslVerifyMode::NONE,
        (Role::Client, _) => SslVerifyMode::PEER,
        (Role::Server, PeerVerify::Optional) => SslVerifyMode::PEER,
        (Role::Server, PeerVerify::Required) => {
            SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT
        }
    }
}

/// Endpoint configuration builder
#[derive(Debug)]
pub struct EndpointConfigBuilder {
    role: Role,
    trust_store: Option<TrustStore>,
    identity: Option<LocalIdentity>,
    policy: VerificationPolicy,
    handshake_timeout: Option<Duration>,
}

impl EndpointConfigBuilder {
    fn new(role: Role) -> Self {
        EndpointConfigBuilder {
            role,
            trust_store: None,
            identity: None,
            policy: VerificationPolicy::required(),
            handshake_timeout: Some(Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS)),
        }
    }

    /// Set the trust anchors
    pub fn trust_store(mut self, store: TrustStore) -> Self {
        self.trust_store = Some(store);
        self
    }

    /// Set the local certificate chain and key
    pub fn identity(mut self, identity: LocalIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Set the verification policy (default: required, with hostname check)
    pub fn policy(mut self, policy: VerificationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the handshake timeout
    pub fn handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Build the endpoint configuration
    pub fn build(self) -> Result<EndpointConfig, ConfigError> {
        let config = configure(
            self.role,
            self.trust_store.as_ref(),
            self.identity.as_ref(),
            self.policy,
        )?;
        Ok(config.with_handshake_timeout(self.handshake_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_verify_parsing() {
        assert_eq!("required".parse::<PeerVerify>().unwrap(), PeerVerify::Required);
        assert_eq!("Optional".parse::<PeerVerify>().unwrap(), PeerVerify::Optional);
        assert_eq!("NONE".parse::<PeerVerify>().unwrap(), PeerVerify::None);
        assert!(matches!(
            "sometimes".parse::<PeerVerify>(),
            Err(ConfigError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn test_policy_presets() {
        assert!(!VerificationPolicy::none().verifies_hostname());
        assert!(VerificationPolicy::required().verifies_hostname());
        assert!(!VerificationPolicy::required()
            .with_hostname_check(false)
            .verifies_hostname());
        assert_eq!(
            VerificationPolicy::from(PeerVerify::Optional),
            VerificationPolicy::optional()
        );
    }

    #[test]
    fn test_missing_trust_anchor() {
        let result = configure(Role::Client, None, None, VerificationPolicy::required());
        assert!(matches!(result, Err(ConfigError::MissingTrustAnchor)));

        let result = EndpointConfig::client()
            .policy(VerificationPolicy::optional())
            .build();
        assert!(matches!(result, Err(ConfigError::MissingTrustAnchor)));
    }

    #[test]
    fn test_server_requires_identity() {
        let result = configure(Role::Server, None, None, VerificationPolicy::none());
        assert!(matches!(result, Err(ConfigError::MissingIdentity)));
    }

    #[test]
    fn test_unverified_client_without_material() {
        let config = configure(Role::Client, None, None, VerificationPolicy::none()).unwrap();

        assert_eq!(config.role(), Role::Client);
        assert_eq!(config.policy().peer, PeerVerify::None);
        assert_eq!(
            config.handshake_timeout(),
            Some(Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS))
        );
    }

    #[test]
    fn test_builder_timeout_override() {
        let config = EndpointConfig::client()
            .policy(VerificationPolicy::none())
            .handshake_timeout(None)
            .build()
            .unwrap();

        assert_eq!(config.handshake_timeout(), None);
    }

    #[test]
    fn test_trust_store_rejects_garbage() {
        let result = TrustStore::from_pem(b"not a certificate");
        assert!(matches!(result, Err(ConfigError::UnreadableKeyMaterial(_))));
    }

    #[test]
    fn test_trust_store_missing_file() {
        let result = TrustStore::from_pem_file("/nonexistent/ca.crt");
        match result {
            Err(ConfigError::UnreadableKeyMaterial(msg)) => {
                assert!(msg.contains("/nonexistent/ca.crt"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_identity_rejects_garbage() {
        let result = LocalIdentity::from_pem(b"garbage", b"garbage");
        assert!(matches!(result, Err(ConfigError::UnreadableKeyMaterial(_))));
    }

    #[test]
    fn test_verify_mode_mapping() {
        assert_eq!(verify_mode(Role::Server, PeerVerify::None), SslVerifyMode::NONE);
        assert_eq!(verify_mode(Role::Client, PeerVerify::Optional), SslVerifyMode::PEER);
        assert_eq!(
            verify_mode(Role::Server, PeerVerify::Required),
            SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT
        );
    }
}
