use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

/// Keeps a cellular USB modem powered, in the right USB mode and connected, but only
/// while something needs it.
#[derive(Debug, Parser, Serialize)]
#[command(author, version, about)]
pub struct Args {
    /// The path to the config file.
    #[arg(long)]
    #[serde(skip)]
    pub config: Option<PathBuf>,
    /// Serial device the modem exposes its AT command port on.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_port: Option<PathBuf>,
    /// Cycle the modem's power once at startup.
    #[arg(long = "restart")]
    // Serialization is skipped if not set because command line args always take
    // precedence over env vars and a config file. This would otherwise make it
    // impossible to set this config option outside of cli args.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub restart_modem: bool,
    /// Seconds between steady-state ping tests.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_interval: Option<u64>,
}
