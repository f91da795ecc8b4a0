use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use utxochat::crypto::{p2pkh_payload, p2pkh_script, sign_ecdsa, sign_schnorr, taproot_script};
use utxochat::message::Message;
use utxochat::network::message::NetworkMessage;
use utxochat::network::wire;
use utxochat::Outpoint;

#[derive(Parser, Debug)]
#[command(name = "utxochat-cli")]
#[command(about = "utxochat client - key generation and message signing", long_about = None)]
struct Args {
    /// Output compact JSON (single line)
    #[arg(long, global = true)]
    compact: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Scheme {
    /// Legacy pay-to-pubkey-hash output, ECDSA signature
    P2pkh,
    /// Taproot key-path output, BIP-340 Schnorr signature
    Taproot,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "lowercase")]
enum Commands {
    /// Generate a key and print the scripts it can own
    Keygen,

    /// Sign a message and print its wire encoding
    Sign {
        #[command(flatten)]
        message: MessageArgs,
    },

    /// Sign a message and deliver it to a node
    Send {
        /// Node gossip address
        #[arg(short, long, default_value = "127.0.0.1:8335")]
        node: String,

        #[arg(long, default_value = "10")]
        timeout_secs: u64,

        #[command(flatten)]
        message: MessageArgs,
    },
}

#[derive(clap::Args, Debug)]
struct MessageArgs {
    /// Owned output as <txid>:<vout>
    #[arg(short, long)]
    outpoint: String,

    /// Secret key controlling the output (hex)
    #[arg(short, long)]
    secret: String,

    #[arg(long, value_enum, default_value = "p2pkh")]
    scheme: Scheme,

    /// Message text
    text: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run_command(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_command(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let output = match &args.command {
        Commands::Keygen => keygen(),
        Commands::Sign { message } => {
            let signed = build_message(message)?;
            json!({
                "outpoint": signed.outpoint().to_string(),
                "size": signed.encoded_len(),
                "hex": hex::encode(signed.encode()),
            })
        }
        Commands::Send {
            node,
            timeout_secs,
            message,
        } => {
            let signed = build_message(message)?;
            deliver(node, &signed, Duration::from_secs(*timeout_secs)).await?;
            json!({
                "outpoint": signed.outpoint().to_string(),
                "size": signed.encoded_len(),
                "node": node,
                "delivered": true,
            })
        }
    };

    if args.compact {
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}

fn keygen() -> Value {
    let secp = Secp256k1::new();
    let (secret, public) = secp.generate_keypair(&mut rand::thread_rng());
    let (xonly, _) = public.x_only_public_key();

    json!({
        "secret_key": hex::encode(secret.secret_bytes()),
        "public_key": hex::encode(public.serialize()),
        "xonly_public_key": hex::encode(xonly.serialize()),
        "p2pkh_script": hex::encode(p2pkh_script(&public)),
        "taproot_script": hex::encode(taproot_script(&xonly)),
    })
}

fn build_message(args: &MessageArgs) -> Result<Message, Box<dyn std::error::Error>> {
    let outpoint: Outpoint = args.outpoint.parse()?;
    let secret = SecretKey::from_slice(&hex::decode(&args.secret)?)?;

    let (payload, signature) = match args.scheme {
        Scheme::P2pkh => {
            let public = PublicKey::from_secret_key(&Secp256k1::new(), &secret);
            let payload = p2pkh_payload(&public, args.text.as_bytes());
            let signature = sign_ecdsa(&secret, &payload);
            (payload, signature)
        }
        Scheme::Taproot => {
            let payload = args.text.as_bytes().to_vec();
            let signature = sign_schnorr(&secret, &payload);
            (payload, signature)
        }
    };

    Ok(Message::new(outpoint, signature, payload)?)
}

async fn deliver(
    node: &str,
    message: &Message,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = tokio::time::timeout(timeout, TcpStream::connect(node))
        .await
        .map_err(|_| format!("connecting to {} timed out", node))??;

    wire::exchange_handshake(&mut stream, timeout).await?;
    wire::write_message(&mut stream, &NetworkMessage::Data(message.encode())).await?;
    stream.shutdown().await?;
    Ok(())
}
