//! Tracing-subscriber bring-up: an `EnvFilter`-driven `FmtSubscriber`, with
//! `atty` deciding whether to color the output.

use std::str::FromStr;

use structopt::StructOpt;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(StructOpt, Clone, Debug)]
pub struct LogOptions {
    /// `tracing_subscriber::EnvFilter` directive string, e.g.
    /// `chain_tracker=debug,warn`.
    #[structopt(long, env = "LOG_FILTER", default_value = "info")]
    pub filter: String,

    /// Emit one JSON object per line instead of the human-readable format.
    #[structopt(long, env = "LOG_JSON")]
    pub json: bool,
}

impl LogOptions {
    pub fn init(&self) -> anyhow::Result<()> {
        let filter = EnvFilter::from_str(&self.filter)?;
        let builder = FmtSubscriber::builder().with_env_filter(filter);
        if self.json {
            builder.json().try_init()
        } else {
            builder.with_ansi(atty::is(atty::Stream::Stderr)).try_init()
        }
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
    }
}
