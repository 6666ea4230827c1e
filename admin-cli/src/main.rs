mod client;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use client::ControllerClient;
use otpgate::crypto::otp::{self, Hotp};
use otpgate::db::Category;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "otpgate-admin")]
#[command(about = "Admin CLI for the otpgate door controller")]
struct Cli {
    /// Controller base URL
    #[arg(long, env = "OTPGATE_URL", default_value = "http://127.0.0.1:8000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the controller's transport public key
    Pubkey,
    /// Create an identity without a secret
    CreateUser {
        username: String,
        /// permanent, guest or business_trip (long_lived, short_lived, medium_lived)
        #[arg(long, default_value = "guest")]
        category: String,
    },
    /// Encrypt a secret under the transport key and attach it to an identity
    Provision {
        username: String,
        /// Base32 secret; a fresh one is generated when omitted
        #[arg(long)]
        secret: Option<String>,
        /// Explicit expiry (RFC 3339), overriding the category default
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,
    },
    /// Print the current code for a base32 secret
    Code { secret: String },
    /// Verify a code for a named identity
    Verify { username: String, code: String },
    /// Resolve an anonymous code as the door reader would
    Resolve {
        code: String,
        /// manual or voice
        #[arg(long, default_value = "manual")]
        method: String,
    },
    /// List identities
    List,
    /// Remove an identity's secret, keeping the identity
    Revoke { username: String },
    /// Delete an identity
    Delete { username: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "otpgate_admin=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let client = ControllerClient::new(cli.url);

    match cli.command {
        Commands::Pubkey => {
            println!("{}", client.public_key().await?);
        }
        Commands::CreateUser { username, category } => {
            let created = client
                .create_user(&username, Category::parse(&category))
                .await?;
            println!("{}", serde_json::to_string_pretty(&created)?);
        }
        Commands::Provision {
            username,
            secret,
            expires_at,
        } => {
            let generated = secret.is_none();
            let secret = Zeroizing::new(secret.unwrap_or_else(otp::generate_secret));
            // Fail before upload if the secret cannot produce codes.
            otp::decode_secret(&secret)?;

            let resp = client.provision(&username, &secret, expires_at).await?;
            tracing::info!("{}", resp.message);
            if generated {
                println!("Secret for {}: {}", username, secret.as_str());
                println!("Enroll it in the authenticator now; it cannot be read back.");
            }
        }
        Commands::Code { secret } => {
            let hotp = Hotp::from_base32(&secret)?;
            println!("{}", hotp.at_time(Utc::now())?);
        }
        Commands::Verify { username, code } => {
            let resp = client.verify(&username, &code).await?;
            println!("{}", resp.message);
            if !resp.access_granted {
                std::process::exit(1);
            }
        }
        Commands::Resolve { code, method } => {
            let resp = client.resolve(&code, &method).await?;
            println!("{}", resp.message);
            if !resp.access_granted {
                std::process::exit(1);
            }
        }
        Commands::List => {
            for identity in client.list().await? {
                let expires = identity
                    .secret_expires_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<24} {:<14} secret={:<5} expires={}",
                    identity.username, identity.category, identity.has_secret, expires
                );
            }
        }
        Commands::Revoke { username } => {
            println!("{}", client.revoke(&username).await?.message);
        }
        Commands::Delete { username } => {
            println!("{}", client.delete(&username).await?.message);
        }
    }

    Ok(())
}
