// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

use anyhow::{Context, Result};
use argh::FromArgs;
use serde::Deserialize;
use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

#[derive(Deserialize)]
#[serde(default)]
pub struct Config {
    pub smtp: Smtp,
    /// Login → password pairs accepted by `AUTH`
    pub users: HashMap<String, String>,
    /// File receiving accepted messages
    #[serde(skip)]
    pub mbox: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            smtp: Smtp::default(),
            users: HashMap::from([("foo@example.org".to_owned(), "bar".to_owned())]),
            mbox: PathBuf::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Smtp {
    pub host: String,
    pub port: u16,
    /// Name this server announces to clients
    pub hostname: String,
    /// Longest command line, CRLF included
    pub command_size_limit: usize,
    /// Longest line of message text, CRLF included
    pub line_length_limit: usize,
    /// Largest message accepted, in bytes; 0 for no limit
    pub data_size_limit: usize,
    pub enable_smtputf8: bool,
    /// Offer the LOGIN mechanism next to PLAIN
    pub auth_login: bool,
    /// Refuse `MAIL` from clients which haven't authenticated
    pub auth_required: bool,
    /// Seconds to wait for a line before dropping the client; 0 to wait
    /// forever
    pub idle_timeout: u64,
}

impl Default for Smtp {
    fn default() -> Self {
        Smtp {
            host: "127.0.0.1".to_owned(),
            port: 1025,
            hostname: "localhost".to_owned(),
            // RFC 5321 section 4.5.3.1.4
            command_size_limit: 512,
            // RFC 5321 section 4.5.3.1.6, plus one for lenient clients
            line_length_limit: 1001,
            data_size_limit: 33_554_432,
            enable_smtputf8: true,
            auth_login: true,
            auth_required: false,
            idle_timeout: 300,
        }
    }
}

impl Smtp {
    pub fn idle_timeout(&self) -> Option<Duration> {
        Some(self.idle_timeout).filter(|&secs| secs > 0).map(Duration::from_secs)
    }
}

/// SMTP server saving the last received message into a file
#[derive(FromArgs)]
struct Args {
    /// file to write received messages to
    #[argh(positional)]
    mbox: PathBuf,
    /// configuration file to use
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,
    /// address to listen on
    #[argh(option)]
    host: Option<String>,
    /// port to run SMTP server on
    #[argh(option)]
    port: Option<u16>,
}

pub fn load() -> Result<Config> {
    let args: Args = argh::from_env();

    let mut config = match args.config {
        None => Config::default(),
        Some(path) => {
            let data = fs::read_to_string(&path)
                .with_context(|| format!("could not read {}", path.display()))?;
            parse(&data).with_context(|| format!("invalid configuration in {}", path.display()))?
        }
    };

    config.mbox = args.mbox;

    if let Some(host) = args.host {
        config.smtp.host = host;
    }

    if let Some(port) = args.port {
        config.smtp.port = port;
    }

    Ok(config)
}

fn parse(data: &str) -> Result<Config> {
    Ok(toml::from_str(data)?)
}
