use anyhow::Result;
use std::future::Future;

mod macros;

mod auth;
mod config;
mod delivery;
mod smtp;
mod state;
mod util;

use auth::{CredentialMap, Mechanism};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = config::load()?;

    let mechanisms: &[Mechanism] = if config.smtp.auth_login {
        Mechanism::ALL
    } else {
        &[Mechanism::Plain]
    };
    let authenticator = CredentialMap::new(config.users).with_mechanisms(mechanisms);

    log::info!("Saving received messages to {}", config.mbox.display());
    let sink = delivery::MailboxSink::new(config.mbox);
    let state = state::State::new(authenticator, sink);

    try_spawn(smtp::server::start(config.smtp, state)).await
}

async fn try_spawn(fut: impl Future<Output = Result<()>> + Send + 'static) -> Result<()> {
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(err) => match err.try_into_panic() {
            Ok(payload) => std::panic::resume_unwind(payload),
            Err(_) => Ok(()),
        },
    }
}
