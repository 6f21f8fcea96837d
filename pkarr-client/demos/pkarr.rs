use std::{str::FromStr, time::Duration};

use clap::{Parser, Subcommand};
use n0_snafu::{Result, ResultExt};
use pkarr_base::{PublicKey, SecretKey};
use pkarr_client::{Client, RelayUrl, ResolvePolicy};

/// Publish and resolve JSON records on pkarr relays.
///
/// Relays are taken from `--relay` and the PKARR_RELAYS environment variable.
#[derive(Parser, Debug)]
struct Cli {
    /// Relay to use, may be repeated. Without a scheme, https is assumed.
    #[clap(short, long)]
    relay: Vec<RelayUrl>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish a JSON value.
    ///
    /// Set the PKARR_SECRET environment variable to the hex secret key to publish under,
    /// otherwise a new key is generated.
    Publish {
        /// The JSON value to publish.
        value: String,
    },
    /// Resolve the value published under a public key.
    Resolve {
        /// Public key, hex or z-base-32.
        public_key: PublicKey,
        /// Wait this many milliseconds after the first answer for a newer record.
        #[clap(long)]
        freshest: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Cli::parse();

    let builder = Client::builder()
        .relays(args.relay)
        .relays_from_env()
        .context("failed to parse PKARR_RELAYS environment variable")?;

    match args.command {
        Command::Publish { value } => {
            let value: serde_json::Value =
                serde_json::from_str(&value).context("value is not valid JSON")?;
            let secret_key = match std::env::var("PKARR_SECRET") {
                Ok(s) => SecretKey::from_str(&s)
                    .context("failed to parse PKARR_SECRET environment variable as secret key")?,
                Err(_) => {
                    let s = SecretKey::generate(&mut rand::rngs::OsRng);
                    println!("Generated a new secret key. To reuse, set");
                    println!(
                        "\tPKARR_SECRET={}",
                        data_encoding::HEXLOWER.encode(&s.to_bytes())
                    );
                    s
                }
            };
            let client = builder.build();
            let public_key = secret_key.public();
            println!("publish {value} for {public_key}");
            println!("to {} relays ...", client.relays().len());

            let outcome = client.put(&secret_key, &value).await?;
            tracing::debug!(response = %outcome.response, "relay acknowledged");
            println!(
                "published with seq {} (first ack from {})",
                outcome.record.seq(),
                outcome.relay
            );
            println!("resolve with:");
            println!("    cargo run --example pkarr --features examples -- resolve {public_key}");
            println!("    z32: {}", public_key.to_z32());
        }
        Command::Resolve {
            public_key,
            freshest,
        } => {
            let policy = match freshest {
                Some(ms) => ResolvePolicy::HighestSeq {
                    window: Duration::from_millis(ms),
                },
                None => ResolvePolicy::FirstVerified,
            };
            let client = builder.resolve_policy(policy).build();
            match client.get(&public_key).await {
                Ok(outcome) => {
                    println!("seq:   {}", outcome.seq);
                    println!("relay: {}", outcome.relay);
                    println!("value: {:#}", outcome.value);
                }
                Err(err) if err.is_not_found() => {
                    println!("no record published for {public_key}");
                }
                Err(err) => {
                    for failure in err.failures() {
                        println!("    {failure}");
                    }
                    return Err(err.into());
                }
            }
        }
    }
    Ok(())
}
