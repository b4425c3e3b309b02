// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! Authentication of SMTP clients

use std::collections::HashMap;

use crate::{keywords, smtp::sasl::Credential};

keywords! {
    /// SASL mechanisms understood by the protocol engine
    pub enum Mechanism {
        Plain = "PLAIN",
        Login = "LOGIN",
    }
}

/// Outcome of an authentication attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthResult {
    pub success: bool,
    /// The attempt was refused because of the mechanism or the shape of the
    /// response, not because of the credentials themselves
    pub handled: bool,
    /// Authenticated identity, set only on success
    pub identity: Option<String>,
}

impl AuthResult {
    pub fn accepted(identity: impl Into<String>) -> Self {
        AuthResult { success: true, handled: false, identity: Some(identity.into()) }
    }

    /// Credentials were well-formed but wrong
    pub fn rejected() -> Self {
        AuthResult { success: false, handled: false, identity: None }
    }

    /// Mechanism is not supported by this authenticator
    pub fn unsupported() -> Self {
        AuthResult { success: false, handled: true, identity: None }
    }
}

/// Decides whether credentials presented with `AUTH` are acceptable
///
/// Implementations are shared between all connections and may be called
/// concurrently. They run on a blocking thread, so consulting slow storage
/// only stalls the session that asked.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, mechanism: Mechanism, credential: &Credential) -> AuthResult;
}

/// Authenticator backed by a fixed login → password map
#[derive(Debug, Default)]
pub struct CredentialMap {
    users: HashMap<String, String>,
    mechanisms: Vec<Mechanism>,
}

impl CredentialMap {
    pub fn new(users: HashMap<String, String>) -> Self {
        CredentialMap { users, mechanisms: Mechanism::ALL.to_vec() }
    }

    /// Restrict mechanisms this map will answer for
    pub fn with_mechanisms(mut self, mechanisms: &[Mechanism]) -> Self {
        self.mechanisms = mechanisms.to_vec();
        self
    }
}

impl Authenticator for CredentialMap {
    fn authenticate(&self, mechanism: Mechanism, credential: &Credential) -> AuthResult {
        if !self.mechanisms.contains(&mechanism) {
            log::debug!("AUTH {mechanism} is disabled");
            return AuthResult::unsupported();
        }

        // Acting on behalf of another identity is not supported
        if !credential.authzid.is_empty() && credential.authzid != credential.authcid {
            log::warn!("{} attempted to authorize as {}", credential.authcid, credential.authzid);
            return AuthResult::rejected();
        }

        match self.users.get(&credential.authcid) {
            Some(password) if *password == credential.password => {
                AuthResult::accepted(credential.authcid.clone())
            }
            _ => AuthResult::rejected(),
        }
    }
}
