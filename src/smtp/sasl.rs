// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! Decoding of SASL PLAIN ([RFC 4616](
//! https://datatracker.ietf.org/doc/html/rfc4616)) and LOGIN responses

use std::fmt;
use thiserror::Error;

/// Base64 of `Username:`, the first LOGIN prompt
pub const LOGIN_USERNAME_PROMPT: &str = "VXNlcm5hbWU6";
/// Base64 of `Password:`, the second LOGIN prompt
pub const LOGIN_PASSWORD_PROMPT: &str = "UGFzc3dvcmQ6";

/// Credentials presented by a client
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Authorization identity, empty when the client didn't request one
    pub authzid: String,
    /// Authentication identity (login)
    pub authcid: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credential")
            .field("authzid", &self.authzid)
            .field("authcid", &self.authcid)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64 - {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("expected 3 NUL-separated fields, got {0}")]
    FieldCount(usize),
    #[error("invalid UTF-8 - {0}")]
    Encoding(#[from] std::str::Utf8Error),
}

/// Decode a PLAIN response: `base64(authzid NUL authcid NUL passwd)`
pub fn decode_plain(blob: &[u8]) -> Result<Credential, DecodeError> {
    let data = base64::decode(blob.trim_ascii())?;

    let fields: Vec<&[u8]> = data.split(|&b| b == 0).collect();
    let [authzid, authcid, password] = fields[..] else {
        return Err(DecodeError::FieldCount(fields.len()));
    };

    Ok(Credential {
        authzid: std::str::from_utf8(authzid)?.to_owned(),
        authcid: std::str::from_utf8(authcid)?.to_owned(),
        password: std::str::from_utf8(password)?.to_owned(),
    })
}

/// Decode one step (username or password) of a LOGIN exchange
pub fn decode_login_step(blob: &[u8]) -> Result<String, DecodeError> {
    let data = base64::decode(blob.trim_ascii())?;
    Ok(std::str::from_utf8(&data)?.to_owned())
}
