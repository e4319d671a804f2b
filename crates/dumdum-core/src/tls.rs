//! TLS setup for the in-band upgrade after the hello exchange.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::rustls::{self, RootCertStore};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Where the server certificate and key come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertSpec {
    /// One PEM file holding the chain and the private key.
    Combined(PathBuf),
    /// Separate chain and key files.
    Pair {
        /// Certificate chain.
        cert: PathBuf,
        /// Private key.
        key: PathBuf,
    },
}

impl CertSpec {
    /// Parse `combined.pem` or `chain.pem:key.pem`.
    pub fn parse(arg: &str) -> Result<Self> {
        if arg.is_empty() {
            return Err(Error::Config("certificate path is empty".into()));
        }
        match arg.rsplit_once(':') {
            // A lone drive letter is part of the path, not a separator.
            Some((cert, _)) if cert.len() == 1 => Ok(CertSpec::Combined(arg.into())),
            Some((cert, key)) if !cert.is_empty() && !key.is_empty() => Ok(CertSpec::Pair {
                cert: cert.into(),
                key: key.into(),
            }),
            Some(_) => Err(Error::Config(format!("invalid certificate spec: {}", arg))),
            None => Ok(CertSpec::Combined(arg.into())),
        }
    }

    fn cert_path(&self) -> &Path {
        match self {
            CertSpec::Combined(path) => path,
            CertSpec::Pair { cert, .. } => cert,
        }
    }

    fn key_path(&self) -> &Path {
        match self {
            CertSpec::Combined(path) => path,
            CertSpec::Pair { key, .. } => key,
        }
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = read_pem(path)?;
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("failed to parse certificates in {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(Error::Config(format!("no certificates found in {}", path.display())));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = read_pem(path)?;
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| Error::Config(format!("failed to parse private key in {}: {}", path.display(), e)))?
        .ok_or_else(|| Error::Config(format!("no private key found in {}", path.display())))
}

/// Build the server-side acceptor.
pub fn load_acceptor(spec: &CertSpec) -> Result<TlsAcceptor> {
    let certs = load_certs(spec.cert_path())?;
    let key = load_key(spec.key_path())?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build a client connector trusting the PEM roots in `ca_file`.
pub fn load_connector(ca_file: &Path) -> Result<TlsConnector> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_file)? {
        roots.add(cert).map_err(|e| Error::Tls(e.to_string()))?;
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Parse the name the server certificate is checked against.
pub fn server_name(name: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(name.to_owned())
        .map_err(|_| Error::Config(format!("invalid TLS server name: {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cert_spec() {
        assert_eq!(
            CertSpec::parse("server.pem").expect("combined"),
            CertSpec::Combined("server.pem".into())
        );
        assert_eq!(
            CertSpec::parse("chain.pem:key.pem").expect("pair"),
            CertSpec::Pair {
                cert: "chain.pem".into(),
                key: "key.pem".into()
            }
        );
        assert_eq!(
            CertSpec::parse(r"C:\certs\server.pem").expect("drive letter"),
            CertSpec::Combined(r"C:\certs\server.pem".into())
        );
        assert!(CertSpec::parse("").is_err());
        assert!(CertSpec::parse("chain.pem:").is_err());
    }

    #[test]
    fn test_missing_files() {
        let spec = CertSpec::parse("/nonexistent/dumdum/server.pem").expect("parse");
        assert!(matches!(load_acceptor(&spec), Err(Error::Config(_))));
        assert!(matches!(
            load_connector(Path::new("/nonexistent/dumdum/ca.pem")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_empty_pem_has_no_certificates() {
        let path = std::env::temp_dir().join(format!("dumdum-empty-{}.pem", std::process::id()));
        std::fs::write(&path, b"").expect("write temp file");
        let result = load_connector(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_server_name() {
        assert!(server_name("localhost").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
        assert!(server_name("not a host!").is_err());
    }
}
