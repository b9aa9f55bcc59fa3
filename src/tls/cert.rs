//! Peer certificate parsing
//!
//! After a handshake the peer leaf certificate is turned into a
//! [`PeerCertificateInfo`]: subject and issuer as typed, ordered attribute
//! sequences, the validity window as rendered by OpenSSL, and the usual
//! identifying extras.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use openssl::x509::{X509NameRef, X509Ref};

/// One attribute of a distinguished name, e.g. `commonName=client.local`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAttribute {
    /// Long attribute name (`commonName`, `organizationName`, ...), or the
    /// dotted OID for attributes OpenSSL has no name for
    pub attribute: String,
    /// Short attribute name (`CN`, `O`, ...), or the dotted OID
    pub short_name: String,
    pub value: String,
}

/// Distinguished name in certificate encoding order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    attributes: Vec<NameAttribute>,
}

impl DistinguishedName {
    /// Extract all entries of an X509_NAME, preserving their order
    pub fn from_x509_name(name: &X509NameRef) -> Self {
        let attributes = name
            .entries()
            .map(|entry| {
                let object = entry.object();
                let nid = object.nid();
                let (attribute, short_name) = match (nid.long_name(), nid.short_name()) {
                    (Ok(long), Ok(short)) => (long.to_string(), short.to_string()),
                    _ => {
                        let oid = object.to_string();
                        (oid.clone(), oid)
                    }
                };

                let data = entry.data();
                let value = match data.as_utf8() {
                    Ok(s) => s.to_string(),
                    Err(_) => String::from_utf8_lossy(data.as_slice()).into_owned(),
                };

                NameAttribute {
                    attribute,
                    short_name,
                    value,
                }
            })
            .collect();

        DistinguishedName { attributes }
    }

    /// Iterate over attributes in encoding order
    pub fn iter(&self) -> std::slice::Iter<'_, NameAttribute> {
        self.attributes.iter()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// First value for an attribute, matched by long or short name
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.attribute == attribute || a.short_name == attribute)
            .map(|a| a.value.as_str())
    }

    pub fn common_name(&self) -> Option<&str> {
        self.get("CN")
    }
}

impl<'a> IntoIterator for &'a DistinguishedName {
    type Item = &'a NameAttribute;
    type IntoIter = std::slice::Iter<'a, NameAttribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.attributes.iter()
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, attr) in self.attributes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", attr.short_name, attr.value)?;
        }
        Ok(())
    }
}

/// Verified peer leaf certificate
///
/// Only ever built from an established session. When the peer presented no
/// certificate there is no `PeerCertificateInfo` at all, never an empty one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCertificateInfo {
    pub subject: DistinguishedName,
    pub issuer: DistinguishedName,
    /// Start of validity as printed by OpenSSL, e.g. `Jan 30 10:03:38 2020 GMT`
    pub not_before: String,
    /// End of validity, same format as `not_before`
    pub not_after: String,
    /// Serial number in upper-case hex
    pub serial_number: String,
    /// X.509 version as displayed (3 for v3 certificates)
    pub version: i32,
    /// Subject Alternative Names (`DNS:` and `IP:` entries)
    pub subject_alt_names: Vec<String>,
}

impl PeerCertificateInfo {
    /// Extract certificate information from an X.509 certificate
    pub fn from_x509(cert: &X509Ref) -> Self {
        let serial_number = cert
            .serial_number()
            .to_bn()
            .and_then(|bn| bn.to_hex_str().map(|s| s.to_string()))
            .unwrap_or_else(|_| "<undef>".to_string());

        PeerCertificateInfo {
            subject: DistinguishedName::from_x509_name(cert.subject_name()),
            issuer: DistinguishedName::from_x509_name(cert.issuer_name()),
            not_before: cert.not_before().to_string(),
            not_after: cert.not_after().to_string(),
            serial_number,
            version: cert.version() + 1,
            subject_alt_names: subject_alt_names(cert),
        }
    }
}

fn subject_alt_names(cert: &X509Ref) -> Vec<String> {
    let mut names = Vec::new();

    if let Some(san_ext) = cert.subject_alt_names() {
        for name in san_ext.iter() {
            if let Some(dns) = name.dnsname() {
                names.push(format!("DNS:{}", dns));
            } else if let Some(ip) = name.ipaddress() {
                if let Ok(octets) = <[u8; 4]>::try_from(ip) {
                    names.push(format!("IP:{}", Ipv4Addr::from(octets)));
                } else if let Ok(octets) = <[u8; 16]>::try_from(ip) {
                    names.push(format!("IP:{}", Ipv6Addr::from(octets)));
                }
            }
        }
    }

    names
}
