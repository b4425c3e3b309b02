// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! SMTP server

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time,
};

use crate::{auth::AuthResult, config, delivery::Envelope, state::State, state::StateRef, util};
use super::{
    framer::{Line, LineReader},
    proto::{self, Action, Connection},
    reply::Reply,
};

pub async fn start(config: config::Smtp, state: StateRef) -> Result<()> {
    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("could not bind TCP socket on {}:{}", config.host, config.port))?;

    log::info!("Started SMTP server on {}", listener.local_addr()?);

    loop {
        let (socket, addr) = listener.accept()
            .await
            .context("could not accept connection")?;

        let config = config.clone();
        let state = state.clone();

        tokio::spawn(async move {
            if let Err(err) = handle_client(config, state, socket, addr).await {
                log::error!("error serving {addr}: {err:?}");
            }
        });
    }
}

/// Handle one SMTP connection
async fn handle_client(
    config: config::Smtp,
    state: StateRef,
    socket: TcpStream,
    addr: SocketAddr,
) -> Result<()> {
    log::info!("{addr}: connected");
    let (reader, writer) = socket.into_split();
    let result = serve(config, &state, reader, writer, addr).await;
    log::info!("{addr}: disconnected");
    result
}

/// Run an SMTP session over a byte stream until the client quits,
/// disconnects, or stays silent for too long
pub async fn serve<R, W>(
    config: config::Smtp,
    state: &State,
    reader: R,
    mut writer: W,
    peer: SocketAddr,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let idle_timeout = config.idle_timeout();
    let mut smtp = Connection::new(config, peer);
    let mut lines = LineReader::new(reader);

    send(&mut writer, &smtp.connect()).await?;

    loop {
        let read = lines.read_line(smtp.line_limit());
        let line = match idle_timeout {
            None => read.await,
            Some(timeout) => match time::timeout(timeout, read).await {
                Ok(line) => line,
                Err(_) => {
                    log::info!("{peer}: timed out waiting for a line");
                    break;
                }
            },
        };

        let line = match line.context("could not read command")? {
            Some(line) => line,
            None => {
                log::debug!("{peer}: connection closed by client");
                break;
            }
        };

        match &line {
            Line::Complete(_) if smtp.awaiting_credentials() => log::trace!(">> <credentials>"),
            Line::Complete(data) => log::trace!(">> {}", proto::loggable(data)),
            Line::TooLong => log::trace!(">> <line too long>"),
        }

        let reply = match smtp.line(line) {
            None => continue,
            Some(Action::Reply(reply)) => reply,
            Some(Action::Authenticate { mechanism, credential }) => {
                log::debug!("{peer}: AUTH {mechanism} attempt for {:?}", credential.authcid);
                let result = state.authenticate(mechanism, credential).await.unwrap_or_else(|err| {
                    log::error!("{peer}: authenticator failed: {err:?}");
                    AuthResult::rejected()
                });
                smtp.authenticated(result)
            }
            Some(Action::Deliver(envelope)) => deliver(state, envelope, peer, smtp.identity()).await,
            Some(Action::Close(reply)) => reply,
        };

        send(&mut writer, &reply).await?;

        if smtp.is_closed() {
            break;
        }
    }

    writer.shutdown().await.ok();
    Ok(())
}

/// Pass a message to the sink and turn its verdict into a reply
async fn deliver(state: &State, envelope: Envelope, peer: SocketAddr, identity: Option<&str>)
-> Reply {
    let summary = format!("from {:?} to {} recipient(s), {} bytes",
        envelope.mail_from, envelope.rcpt_tos.len(), envelope.content.len());

    let verdict = match state.submit_message(envelope).await {
        Ok(verdict) => verdict,
        Err(err) => {
            log::error!("{peer}: could not process message {summary}: {err:?}");
            return processing_error();
        }
    };

    match verdict.as_deref().map(str::trim) {
        None | Some("") => {
            log::info!("{peer}: accepted message {summary} (user {})", identity.unwrap_or("-"));
            Reply::ok()
        }
        Some(line) => match Reply::parse(line) {
            Some(reply) => {
                log::info!("{peer}: sink answered {} to message {summary}", reply.code());
                reply
            }
            None => {
                log::warn!("{peer}: sink returned malformed reply {line:?}");
                processing_error()
            }
        },
    }
}

fn processing_error() -> Reply {
    Reply::new(451, "Requested action aborted: error in processing")
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, reply: &Reply) -> Result<()> {
    let data = reply.to_string();
    log::trace!("<< {}", util::maybe_ascii(data.as_bytes()));
    writer.write_all(data.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
