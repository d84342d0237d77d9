//! Terminal simulator for the NFC card-detection bridge.
//!
//! Runs the bridge against the mock payment kernel so card-detection flows
//! can be exercised without terminal hardware:
//!
//! ```sh
//! tapbridge simulate --uuid 04AABBCC
//! tapbridge simulate --error-code -2549
//! tapbridge --config bridge.json simulate --noise 3 --uuid 04AABBCC
//! RUST_LOG=tapbridge_core=debug tapbridge simulate
//! ```

mod simulate;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tapbridge_core::BridgeConfig;
use tapbridge_hardware::DeviceDescriptor;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::simulate::{Presentation, Scenario};

#[derive(Parser, Debug)]
#[command(name = "tapbridge", version)]
#[command(about = "Simulate NFC card detection on a payment terminal")]
struct Cli {
    /// JSON configuration file (defaults apply to omitted fields)
    #[arg(long, env = "TAPBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective configuration
    Config,
    /// Connect, start one card check and present a card
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Reported device manufacturer
    #[arg(long, default_value = "SUNMI")]
    manufacturer: String,

    /// Installed payment service version
    #[arg(long, default_value_t = 320)]
    service_version: u32,

    /// Simulate a device without the payment service
    #[arg(long)]
    no_payment_service: bool,

    /// Simulate a kernel that connects without a card reader
    #[arg(long)]
    no_reader: bool,

    /// Card identifier to present
    #[arg(long)]
    uuid: Option<String>,

    /// Report this error code instead of a clean tap
    #[arg(long, allow_hyphen_values = true)]
    error_code: Option<i32>,

    /// Message attached to --error-code
    #[arg(long, requires = "error_code")]
    message: Option<String>,

    /// Repeated-call errors delivered before the card
    #[arg(long, default_value_t = 0)]
    noise: usize,
}

impl SimulateArgs {
    fn into_scenario(self) -> Scenario {
        let mut device = DeviceDescriptor::new(self.manufacturer);
        if !self.no_payment_service {
            device = device.with_service_version(self.service_version);
        }

        let presentation = match (self.error_code, self.uuid) {
            (Some(code), uuid) => Presentation::Error {
                code,
                message: self.message,
                uuid,
            },
            (None, Some(uuid)) => Presentation::Tap { uuid },
            (None, None) => Presentation::Silent,
        };

        Scenario {
            device,
            reader_available: !self.no_reader,
            noise: self.noise,
            presentation,
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    let Some(path) = path else {
        return Ok(BridgeConfig::default());
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config = BridgeConfig::from_json_str(&text)
        .with_context(|| format!("failed to load {}", path.display()))?;
    debug!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Simulate(args) => {
            let report = simulate::run(config, args.into_scenario()).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_simulate_args_to_scenario() {
        let cli = Cli::try_parse_from([
            "tapbridge",
            "simulate",
            "--error-code",
            "-4000",
            "--uuid",
            "08C0FFEE",
            "--noise",
            "2",
        ])
        .unwrap();

        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        let scenario = args.into_scenario();
        assert_eq!(scenario.noise, 2);
        assert_eq!(scenario.device.service_version, Some(320));
        assert_eq!(
            scenario.presentation,
            Presentation::Error {
                code: -4000,
                message: None,
                uuid: Some("08C0FFEE".to_string()),
            }
        );
    }

    #[test]
    fn test_no_payment_service() {
        let cli = Cli::try_parse_from(["tapbridge", "simulate", "--no-payment-service"]).unwrap();
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        let scenario = args.into_scenario();
        assert_eq!(scenario.device.service_version, None);
        assert_eq!(scenario.presentation, Presentation::Silent);
    }

    #[test]
    fn test_message_requires_error_code() {
        let result = Cli::try_parse_from(["tapbridge", "simulate", "--message", "x"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let error = load_config(Some(Path::new("/nonexistent/bridge.json"))).unwrap_err();
        assert!(error.to_string().contains("failed to read"));
    }
}
