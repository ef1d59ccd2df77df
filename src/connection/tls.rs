//! Synchronous TLS bootstrap (§9 "one-shot TLS bootstrap").
//!
//! Unlike the teacher's `tokio-rustls` handshake driven by the async reactor, this runs once,
//! to completion, over a still-blocking socket, right after the plain connect and before the
//! socket is switched to non-blocking for steady-state protocol traffic.

use std::io;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme, StreamOwned};

use crate::config::Config;
use crate::error::Error;

use super::io::PlainStream;

fn io_err(e: io::Error) -> Error {
    Error::from(e)
}

fn rustls_err(e: rustls::Error) -> Error {
    Error::from(io::Error::new(io::ErrorKind::Other, e))
}

/// Accepts any server certificate without checking its name or chain, matching the crate's
/// `ssl_server_hostname_verification_enabled = false` default.
#[derive(Debug)]
struct NoServerVerification;

impl ServerCertVerifier for NoServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(&self, _message: &[u8], _cert: &CertificateDer<'_>, _dss: &DigitallySignedStruct) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(&self, _message: &[u8], _cert: &CertificateDer<'_>, _dss: &DigitallySignedStruct) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider().signature_verification_algorithms.supported_schemes()
    }
}

fn client_config(config: &Config) -> Result<Arc<ClientConfig>, Error> {
    let mut roots = RootCertStore::empty();
    if let Some(ca_path) = &config.ssl_certificate_authority_file {
        let bytes = std::fs::read(ca_path).map_err(io_err)?;
        let mut reader = io::BufReader::new(bytes.as_slice());
        for cert in rustls_pemfile::certs(&mut reader) {
            roots.add(cert.map_err(io_err)?).map_err(rustls_err)?;
        }
    } else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);
    let mut cfg = builder.with_no_client_auth();
    if !config.ssl_server_hostname_verification_enabled {
        cfg.dangerous().set_certificate_verifier(Arc::new(NoServerVerification));
    }
    Ok(Arc::new(cfg))
}

/// Wraps an already-connected, still-blocking [`PlainStream`] in a TLS session and drives the
/// handshake to completion.
pub(crate) fn negotiate(plain: PlainStream, config: &Config) -> Result<StreamOwned<ClientConnection, PlainStream>, Error> {
    let cfg = client_config(config)?;
    let hostname = config.net_hostname.clone().unwrap_or_else(|| "localhost".to_string());
    let server_name = ServerName::try_from(hostname).map_err(|_| io_err(io::Error::new(io::ErrorKind::InvalidInput, "invalid server name for TLS")))?;
    let conn = ClientConnection::new(cfg, server_name).map_err(rustls_err)?;
    let mut stream = StreamOwned::new(conn, plain);
    stream.conn.complete_io(&mut stream.sock).map_err(io_err)?;
    Ok(stream)
}

/// The raw DER of the server's leaf certificate, for SCRAM `tls-server-end-point` channel
/// binding.
pub(crate) fn peer_cert_der(stream: &StreamOwned<ClientConnection, PlainStream>) -> Option<Vec<u8>> {
    stream.conn.peer_certificates().and_then(|certs| certs.first()).map(|c| c.as_ref().to_vec())
}
