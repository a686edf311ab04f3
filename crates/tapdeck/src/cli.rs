// ── Argument parsing ──

use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;

use tapdeck_hw::DiscoveryMethod;

/// Card-present payment engine demo.
///
/// Drives the orchestration engine against a simulated card reader and
/// prints the payment event stream as it unfolds.
#[derive(Debug, Parser)]
#[command(name = "tapdeck", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover and connect a simulated reader.
    Connect {
        #[arg(long, value_enum, default_value_t = MethodArg::Bluetooth)]
        method: MethodArg,

        /// How many readers the simulated scan finds.
        #[arg(long, default_value_t = 1)]
        readers: u8,
    },
    /// Collect a demo payment end-to-end.
    Pay {
        /// Order total (usd).
        #[arg(long, default_value = "12.50")]
        total: Decimal,

        #[arg(long, value_enum, default_value_t = MethodArg::Bluetooth)]
        method: MethodArg,

        /// How many readers the simulated scan finds.
        #[arg(long, default_value_t = 1)]
        readers: u8,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    /// External reader over Bluetooth.
    Bluetooth,
    /// The device's built-in (tap-to-pay) reader.
    BuiltIn,
}

impl From<MethodArg> for DiscoveryMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Bluetooth => DiscoveryMethod::BluetoothScan,
            MethodArg::BuiltIn => DiscoveryMethod::BuiltIn,
        }
    }
}
