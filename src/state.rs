// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

use anyhow::Result;
use std::sync::Arc;
use tokio::task;

use crate::{
    auth::{AuthResult, Authenticator, Mechanism},
    delivery::{Envelope, Sink},
    smtp::sasl::Credential,
};

/// Collaborators shared by all SMTP connections
pub struct State {
    authenticator: Arc<dyn Authenticator>,
    sink: Arc<dyn Sink>,
}

pub type StateRef = Arc<State>;

impl State {
    pub fn new(authenticator: impl Authenticator + 'static, sink: impl Sink + 'static) -> StateRef {
        Arc::new(State {
            authenticator: Arc::new(authenticator),
            sink: Arc::new(sink),
        })
    }

    /// Check credentials without blocking other connections
    pub async fn authenticate(&self, mechanism: Mechanism, credential: Credential)
    -> Result<AuthResult> {
        let authenticator = self.authenticator.clone();
        let result = task::spawn_blocking(
            move || authenticator.authenticate(mechanism, &credential)).await?;
        Ok(result)
    }

    /// Hand a message over to the sink without blocking other connections
    ///
    /// A panicking sink is reported as an error, same as one that fails.
    pub async fn submit_message(&self, envelope: Envelope) -> Result<Option<String>> {
        let sink = self.sink.clone();
        task::spawn_blocking(move || sink.accept(&envelope)).await?
    }
}
