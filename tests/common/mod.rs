//! Throwaway PKI for the integration tests
//!
//! Generates the lab layout in a temporary directory:
//!
//! - `ca.crt`: trust anchor
//! - `server.crt` / `server.key`: CN=localhost, SAN localhost + 127.0.0.1
//! - `client.crt` / `client.key`: CN=client.local
//! - `other.crt` / `other.key`: server certificate for other.example
//! - `rogue.crt` / `rogue.key`: client certificate from an untrusted CA

#![allow(dead_code)]

use std::fs;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509Name, X509NameBuilder, X509};
use tempfile::TempDir;

use mtlslab::tls::{
    handshake, EndpointConfig, HandshakeError, LocalIdentity, Session, TrustStore,
    VerificationPolicy,
};

pub struct Issued {
    pub cert: X509,
    pub key: PKey<Private>,
}

pub struct Pki {
    dir: TempDir,
}

#[derive(Clone, Copy)]
enum Usage {
    Ca,
    Server,
    Client,
}

fn new_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn name(org: &str, cn: &str) -> X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder.append_entry_by_text("C", "NO").unwrap();
    builder.append_entry_by_text("O", org).unwrap();
    builder.append_entry_by_text("CN", cn).unwrap();
    builder.build()
}

fn issue(
    subject: X509Name,
    sans: &[&str],
    usage: Usage,
    issuer: Option<&Issued>,
) -> Issued {
    let key = new_key();

    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&subject).unwrap();
    match issuer {
        Some(ca) => builder.set_issuer_name(ca.cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&subject).unwrap(),
    }
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();

    match usage {
        Usage::Ca => {
            builder
                .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
                .unwrap();
            builder
                .append_extension(
                    KeyUsage::new()
                        .critical()
                        .key_cert_sign()
                        .crl_sign()
                        .build()
                        .unwrap(),
                )
                .unwrap();
        }
        Usage::Server | Usage::Client => {
            builder
                .append_extension(BasicConstraints::new().build().unwrap())
                .unwrap();
            builder
                .append_extension(KeyUsage::new().critical().digital_signature().build().unwrap())
                .unwrap();
            let mut eku = ExtendedKeyUsage::new();
            match usage {
                Usage::Server => eku.server_auth(),
                _ => eku.client_auth(),
            };
            builder.append_extension(eku.build().unwrap()).unwrap();
        }
    }

    if !sans.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for entry in sans {
            if entry.parse::<std::net::IpAddr>().is_ok() {
                san.ip(entry);
            } else {
                san.dns(entry);
            }
        }
        let ext = {
            let ctx = builder.x509v3_context(issuer.map(|ca| ca.cert.as_ref()), None);
            san.build(&ctx).unwrap()
        };
        builder.append_extension(ext).unwrap();
    }

    let signing_key = issuer.map(|ca| &ca.key).unwrap_or(&key);
    builder.sign(signing_key, MessageDigest::sha256()).unwrap();

    Issued {
        cert: builder.build(),
        key,
    }
}

fn write_pair(dir: &Path, stem: &str, issued: &Issued) {
    fs::write(
        dir.join(format!("{}.crt", stem)),
        issued.cert.to_pem().unwrap(),
    )
    .unwrap();
    fs::write(
        dir.join(format!("{}.key", stem)),
        issued.key.private_key_to_pem_pkcs8().unwrap(),
    )
    .unwrap();
}

impl Pki {
    pub fn generate() -> Self {
        let dir = tempfile::tempdir().unwrap();

        let ca = issue(name("Lab CA", "Lab Root CA"), &[], Usage::Ca, None);
        let server = issue(
            name("Lab Servers", "localhost"),
            &["localhost", "127.0.0.1"],
            Usage::Server,
            Some(&ca),
        );
        let client = issue(
            name("Lab Clients", "client.local"),
            &[],
            Usage::Client,
            Some(&ca),
        );
        let other = issue(
            name("Lab Servers", "other.example"),
            &["other.example"],
            Usage::Server,
            Some(&ca),
        );

        let rogue_ca = issue(name("Rogue", "Rogue CA"), &[], Usage::Ca, None);
        let rogue = issue(
            name("Rogue", "client.local"),
            &[],
            Usage::Client,
            Some(&rogue_ca),
        );

        fs::write(dir.path().join("ca.crt"), ca.cert.to_pem().unwrap()).unwrap();
        write_pair(dir.path(), "server", &server);
        write_pair(dir.path(), "client", &client);
        write_pair(dir.path(), "other", &other);
        write_pair(dir.path(), "rogue", &rogue);

        Pki { dir }
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.path().join(file)
    }

    pub fn read(&self, file: &str) -> Vec<u8> {
        fs::read(self.path(file)).unwrap()
    }

    pub fn trust_store(&self) -> TrustStore {
        TrustStore::from_pem_file(self.path("ca.crt")).unwrap()
    }

    /// `stem` is one of server, client, other, rogue
    pub fn identity(&self, stem: &str) -> LocalIdentity {
        LocalIdentity::from_pem_files(
            self.path(&format!("{}.crt", stem)),
            self.path(&format!("{}.key", stem)),
        )
        .unwrap()
    }

    pub fn server_config(&self, stem: &str, policy: VerificationPolicy) -> EndpointConfig {
        EndpointConfig::server()
            .trust_store(self.trust_store())
            .identity(self.identity(stem))
            .policy(policy)
            .build()
            .unwrap()
    }

    /// Client verifying the server, presenting `identity` when given
    pub fn client_config(&self, identity: Option<&str>, policy: VerificationPolicy) -> EndpointConfig {
        let mut builder = EndpointConfig::client()
            .trust_store(self.trust_store())
            .policy(policy);
        if let Some(stem) = identity {
            builder = builder.identity(self.identity(stem));
        }
        builder.build().unwrap()
    }
}

/// Accept one connection on a fresh loopback listener and handshake it on
/// a background thread
pub fn accept_one(
    config: EndpointConfig,
) -> (SocketAddr, JoinHandle<Result<Session, HandshakeError>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        handshake(stream, &config, None)
    });

    (addr, handle)
}

pub fn connect(
    addr: SocketAddr,
    config: &EndpointConfig,
    server_name: &str,
) -> Result<Session, HandshakeError> {
    let stream = TcpStream::connect(addr).unwrap();
    handshake(stream, config, Some(server_name))
}
