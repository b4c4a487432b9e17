//! Command-line interface for kcb-gateway.
//!
//! Talks to a running `kcb-gatewayd` over its HTTP API.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kcb_gateway::api_client::Client;

/// Control a KCB-5 robot controller through kcb-gatewayd
#[derive(Parser, Debug)]
#[command(name = "kcb-cli", version, about, long_about = None)]
struct Cli {
    /// Daemon address
    #[arg(long, env = "KCB_URL", default_value = "http://127.0.0.1:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that the daemon is up
    Health,

    /// Analog and digital readings together
    Status,

    /// Read the digital pins, or set them
    Digital {
        #[command(subcommand)]
        set: Option<SetPins>,
    },

    /// Read the servo positions, or move servos
    Servo {
        #[command(subcommand)]
        set: Option<SetServos>,
    },

    /// Read the analog inputs
    Analog,

    /// Write raw bytes to the I2C or SPI bus
    Bus {
        /// `i2c` or `spi`
        bus: String,
        /// Device address, decimal or 0x-prefixed hex
        #[arg(value_parser = integer)]
        addr: i64,
        /// Bytes to write, decimal or 0x-prefixed hex
        #[arg(value_parser = integer)]
        data: Vec<i64>,
    },

    /// Pass raw bytes through to the controller's UART
    Uart {
        /// Bytes to write, decimal or 0x-prefixed hex
        #[arg(required = true, value_parser = integer)]
        data: Vec<i64>,
    },
}

#[derive(Subcommand, Debug)]
enum SetPins {
    /// Drive pins from pin 0 up; the rest go low
    Set {
        #[arg(required = true, value_parser = integer)]
        values: Vec<i64>,
    },
}

#[derive(Subcommand, Debug)]
enum SetServos {
    /// Move servos from channel 0 up
    Set {
        #[arg(required = true, value_parser = integer)]
        positions: Vec<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new(cli.url);

    match cli.command {
        Commands::Health => println!("{}", client.health().await?),
        Commands::Status => println!("{}", serde_json::to_string(&client.status().await?)?),
        Commands::Digital { set: None } => println!("{:?}", client.read_digital().await?),
        Commands::Digital {
            set: Some(SetPins::Set { values }),
        } => client.write_digital(&values).await?,
        Commands::Servo { set: None } => println!("{:?}", client.read_servo().await?),
        Commands::Servo {
            set: Some(SetServos::Set { positions }),
        } => client.write_servo(&positions).await?,
        Commands::Analog => println!("{:?}", client.read_analog().await?),
        Commands::Bus { bus, addr, data } => client
            .write_bus(&bus, addr, &data)
            .await
            .context("bus write failed")?,
        Commands::Uart { data } => client.write_uart(&data).await.context("uart write failed")?,
    }

    Ok(())
}

/// Decimal, or hex with a `0x` prefix.
fn integer(arg: &str) -> Result<i64, String> {
    let parsed = match arg.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => arg.parse(),
    };
    parsed.map_err(|e| format!("not an integer: {e}"))
}
