pub mod backend;
pub mod browse;
pub mod chat;
pub mod commands;
pub mod config;
pub mod error;
pub mod feed;
pub mod models;
pub mod notify;
pub mod organizer;
pub mod profile;
pub mod realtime;
pub mod rsvp;
pub mod session;
mod utils;

#[cfg(test)]
pub mod testing;
#[cfg(test)]
mod tests;

use clap::Parser;

pub use error::{AppError, AppResult};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("event_feed_lib=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    commands::execute(commands::Cli::parse()).await
}
