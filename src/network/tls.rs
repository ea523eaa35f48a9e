//! TLS transport for broker connections.
//!
//! Builds a [`DialFn`] backed by `tokio-rustls`. The rustls client config
//! is assembled once (root store from a CA file or the webpki roots,
//! optional client certificate auth) and shared by every dial.

use std::fs::File;
use std::io::BufReader;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::{io, sync::Arc};

use rustls_pemfile::{certs, pkcs8_private_keys};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio::net::TcpStream;
use tokio_rustls::{rustls, TlsConnector};

use crate::error::{Error, Result};

use super::{BoxedConn, BrokerAddress, DialFn, DialFuture};

/// Certificate material for TLS connections.
#[derive(Clone, Debug, Default)]
pub struct TlsOptions {
    /// PEM file with the CA roots to trust. Falls back to the webpki
    /// roots when unset.
    pub cafile: Option<PathBuf>,
    /// PEM file with the client certificate chain, for mutual TLS.
    pub cert: Option<PathBuf>,
    /// PEM file with the client's pkcs8 private key, for mutual TLS.
    pub key: Option<PathBuf>,
}

/// A TLS dialer over TCP.
///
/// ### Example
/// ```rust,no_run
/// # fn main() -> castle::prelude::Result<()> {
/// let dial_fn = castle::prelude::tls_dial_fn(Default::default())?;
/// # Ok(())
/// # }
/// ```
pub fn tls_dial_fn(options: TlsOptions) -> Result<DialFn> {
    let mut root_cert_store = rustls::RootCertStore::empty();
    if let Some(cafile) = &options.cafile {
        let mut pem = BufReader::new(File::open(cafile).map_err(|e| Error::Dial(e.kind()))?);
        for cert in rustls_pemfile::certs(&mut pem) {
            let cert = cert.map_err(|e| Error::Dial(e.kind()))?;
            root_cert_store
                .add(cert)
                .map_err(|_| Error::Dial(ErrorKind::InvalidData))?;
        }
    } else {
        root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(root_cert_store);
    let config = match (&options.cert, &options.key) {
        (Some(cert), Some(key)) => {
            let certs = load_certs(cert).map_err(|e| Error::Dial(e.kind()))?;
            let key = load_keys(key).map_err(|e| Error::Dial(e.kind()))?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|_| Error::Dial(ErrorKind::InvalidData))?
        }
        _ => builder.with_no_client_auth(),
    };

    let connector = TlsConnector::from(Arc::new(config));

    Ok(Arc::new(move |addr: BrokerAddress| -> DialFuture {
        let connector = connector.clone();
        Box::pin(async move {
            tracing::debug!("Connecting to {} over tls", addr);
            let stream = TcpStream::connect((addr.host.as_str(), addr.port))
                .await
                .map_err(|e| Error::Dial(e.kind()))?;

            let domain = ServerName::try_from(addr.host.clone())
                .map_err(|_| Error::Dial(ErrorKind::InvalidInput))?
                .to_owned();

            let stream = connector
                .connect(domain, stream)
                .await
                .map_err(|e| Error::Dial(e.kind()))?;

            Ok(Box::new(stream) as BoxedConn)
        })
    }))
}

fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    certs(&mut BufReader::new(File::open(path)?)).collect()
}

fn load_keys(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    pkcs8_private_keys(&mut BufReader::new(File::open(path)?))
        .next()
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidData, "no pkcs8 key in file"))?
        .map(Into::into)
}
