use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "fieldlink-agent",
    version,
    about = "Field agent: BLE control link and radio directive dispatcher"
)]
pub struct Cli {
    /// Path to config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address of the fixed peer (overrides the config file)
    #[arg(long, global = true)]
    pub mac: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the agent in the foreground
    Run,

    /// Scan for the peer and list candidates, strongest signal first
    Scan {
        /// Scan duration in seconds
        #[arg(long, default_value_t = 10)]
        timeout: u64,

        /// List every device seen, not only candidates
        #[arg(long)]
        all: bool,
    },

    /// Connect, send one JSON message, print replies for a few seconds, disconnect
    Send {
        /// JSON message, e.g. '{"sessionId":"t","action":"PREPARE_BT"}'
        json: String,
    },

    /// Write a default config file (does not overwrite unless --force)
    InitConfig {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },

    /// Print the resolved config file path
    PrintConfigPath,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_with_mac() {
        let cli = Cli::try_parse_from([
            "fieldlink-agent",
            "send",
            r#"{"action":"RELEASE"}"#,
            "--mac",
            "AA:BB:CC:DD:EE:01",
        ])
        .unwrap();
        assert_eq!(cli.mac.as_deref(), Some("AA:BB:CC:DD:EE:01"));
        assert!(matches!(cli.command, Some(Command::Send { ref json }) if json.contains("RELEASE")));
    }

    #[test]
    fn test_default_command_is_none() {
        let cli = Cli::try_parse_from(["fieldlink-agent"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_scan_defaults() {
        let cli = Cli::try_parse_from(["fieldlink-agent", "scan"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Scan { timeout: 10, all: false })));
    }
}
