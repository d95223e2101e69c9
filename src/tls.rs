use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;

use crate::config::TlsConfig;

/// Build the acceptor from PEM files; `None` serves plaintext only.
pub fn load_tls_acceptor(tls: Option<&TlsConfig>) -> io::Result<Option<TlsAcceptor>> {
    let Some(tls) = tls else { return Ok(None) };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(&tls.cert_path)?))
        .collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(ErrorKind::InvalidInput, "no certificates found in cert file"));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(&tls.key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}
