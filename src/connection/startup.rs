//! Startup and authentication handshake: builds the `StartupMessage`, then drives whichever
//! `AuthenticationXxx` exchange the server asks for (cleartext, MD5, or SCRAM-SHA-256),
//! grounded on the real message sequence (`AuthenticationOk`/`...Cleartext`/`...Md5`/`...Sasl*`).

use bytes::BytesMut;
use postgres_protocol::authentication::{self, sasl};
use postgres_protocol::message::{backend, frontend};

use crate::config::Config;
use crate::error::{ClientError, ClientErrorKind, Error};

fn malformed(detail: &'static str) -> Error {
    Error::from(ClientError::with_detail(ClientErrorKind::MalformedInput, detail))
}

fn io(e: std::io::Error) -> Error {
    Error::from(e)
}

pub(crate) fn encode_startup(config: &Config) -> Result<BytesMut, Error> {
    let mut buf = BytesMut::new();
    let params: [(&str, &str); 2] = [("user", config.get_user()), ("database", config.get_dbname())];
    frontend::startup_message(params, &mut buf).map_err(io)?;
    Ok(buf)
}

/// Drives one step of SCRAM-SHA-256 authentication. Mutable across round trips: `Pending`
/// after the initial response is sent, consumed by `finish` once the server confirms.
pub(crate) enum ScramState {
    Idle,
    Pending(sasl::ScramSha256),
}

impl Default for ScramState {
    fn default() -> Self {
        ScramState::Idle
    }
}

/// Handles one authentication-phase backend message, returning bytes to send in reply (if
/// any). `channel_binding_cert` is the TLS peer certificate DER, when the connection is
/// TLS-secured and SCRAM channel binding is therefore possible.
pub(crate) fn handle_auth_message(
    msg: &backend::Message,
    config: &Config,
    scram: &mut ScramState,
    #[cfg_attr(not(feature = "tls"), allow(unused_variables))] channel_binding_cert: Option<&[u8]>,
) -> Result<Option<BytesMut>, Error> {
    match msg {
        backend::Message::AuthenticationOk => Ok(None),
        backend::Message::AuthenticationCleartextPassword => {
            let password = config.password.as_deref().ok_or_else(|| malformed("server requested a password but none was configured"))?;
            let mut buf = BytesMut::new();
            frontend::password_message(password.as_bytes(), &mut buf).map_err(io)?;
            Ok(Some(buf))
        }
        backend::Message::AuthenticationMd5Password(body) => {
            let password = config.password.as_deref().ok_or_else(|| malformed("server requested a password but none was configured"))?;
            let hash = authentication::md5_hash(config.get_user().as_bytes(), password.as_bytes(), body.salt());
            let mut buf = BytesMut::new();
            frontend::password_message(hash.as_bytes(), &mut buf).map_err(io)?;
            Ok(Some(buf))
        }
        backend::Message::AuthenticationSasl(body) => {
            let password = config.password.as_deref().ok_or_else(|| malformed("server requested SASL auth but no password was configured"))?;
            let mut mechanisms = body.mechanisms();
            let mut plus_available = false;
            let mut plain_available = false;
            while let Some(m) = mechanisms.next().map_err(io)? {
                if m == sasl::SCRAM_SHA_256_PLUS {
                    plus_available = true;
                }
                if m == sasl::SCRAM_SHA_256 {
                    plain_available = true;
                }
            }
            let use_plus = plus_available && channel_binding_cert.is_some() && cfg!(feature = "tls");
            let mechanism = if use_plus { sasl::SCRAM_SHA_256_PLUS } else { sasl::SCRAM_SHA_256 };
            let channel_binding = if use_plus {
                #[cfg(feature = "tls")]
                {
                    use sha2::{Digest, Sha256};
                    let hash = Sha256::digest(channel_binding_cert.unwrap());
                    sasl::ChannelBinding::tls_server_end_point(hash.to_vec())
                }
                #[cfg(not(feature = "tls"))]
                {
                    unreachable!("use_plus implies the tls feature is enabled")
                }
            } else if plain_available {
                sasl::ChannelBinding::unsupported()
            } else {
                sasl::ChannelBinding::unrequested()
            };
            let mut client = sasl::ScramSha256::new(password.as_bytes(), channel_binding);
            let mut buf = BytesMut::new();
            frontend::sasl_initial_response(mechanism, client.message(), &mut buf).map_err(io)?;
            *scram = ScramState::Pending(client);
            Ok(Some(buf))
        }
        backend::Message::AuthenticationSaslContinue(body) => {
            let ScramState::Pending(client) = scram else {
                return Err(malformed("unexpected AuthenticationSASLContinue outside of a SASL exchange"));
            };
            client.update(body.data()).map_err(io)?;
            let mut buf = BytesMut::new();
            frontend::sasl_response(client.message(), &mut buf).map_err(io)?;
            Ok(Some(buf))
        }
        backend::Message::AuthenticationSaslFinal(body) => {
            let ScramState::Pending(client) = scram else {
                return Err(malformed("unexpected AuthenticationSASLFinal outside of a SASL exchange"));
            };
            client.finish(body.data()).map_err(io)?;
            Ok(None)
        }
        backend::Message::AuthenticationKerberosV5
        | backend::Message::AuthenticationScmCredential
        | backend::Message::AuthenticationGss
        | backend::Message::AuthenticationSspi => Err(malformed("unsupported authentication method requested by server")),
        _ => Err(malformed("unexpected message during authentication phase")),
    }
}
