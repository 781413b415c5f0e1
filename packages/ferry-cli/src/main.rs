//! Ferry CLI
//!
//! Thin embedder around `ferry-core`: `ferry listen` runs the receiving
//! side against a storage directory, `ferry send` offers a file to a
//! listener. All engine behavior lives in the library; this binary only
//! parses flags, loads credentials, and wires the pieces together.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use ferry_core::{
    accept_and_serve, run_sender, ByteStream, Credentials, FileMetadata, Settings,
    TransferRegistry,
};
use ferry_core::transfer::TCP_TRANSPORT;

#[derive(Parser, Debug)]
#[command(name = "ferry", version, about = "Chunked, resumable file transfers over TCP or QUIC")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Receive transfers: accept authenticated channels and request chunks.
    Listen {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:4242", env = "FERRY_ADDR")]
        addr: String,

        /// Directory destination files are created under
        #[arg(long, env = "FERRY_STORAGE_DIR")]
        storage_dir: Option<PathBuf>,

        /// JSON settings file (alternative to --storage-dir)
        #[arg(long, env = "FERRY_SETTINGS")]
        settings: Option<PathBuf>,

        /// Number of connections to serve before exiting (default: unlimited)
        #[arg(long)]
        max_iterations: Option<usize>,

        #[command(flatten)]
        credentials: CredentialArgs,
    },

    /// Offer a file to a listener and answer its chunk requests.
    Send {
        /// Listener address to dial
        #[arg(long, default_value = "127.0.0.1:4242", env = "FERRY_ADDR")]
        addr: String,

        /// File to transfer
        #[arg(long)]
        file: PathBuf,

        /// Stable transfer identifier; generated when omitted
        #[arg(long)]
        uuid: Option<String>,

        /// Logical flow tag carried in the metadata frame
        #[arg(long, default_value = "")]
        flow_name: String,

        /// Chunk size in bytes
        #[arg(long, default_value_t = 32 * 1024)]
        chunk_size: u64,

        /// Data-plane transport: TCP or QUIC
        #[arg(long, default_value = TCP_TRANSPORT)]
        transport: String,

        /// Data-plane endpoint to advertise (required for QUIC; port 0
        /// binds an ephemeral port)
        #[arg(long)]
        quic_addr: Option<String>,

        /// Wall-clock serve deadline in seconds
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,

        /// Skip server-certificate verification when dialing
        #[arg(long)]
        insecure: bool,

        #[command(flatten)]
        credentials: CredentialArgs,
    },
}

#[derive(Args, Debug)]
struct CredentialArgs {
    /// PEM certificate chain
    #[arg(long, env = "FERRY_CERT", required_unless_present = "self_signed")]
    cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, env = "FERRY_KEY", required_unless_present = "self_signed")]
    key: Option<PathBuf>,

    /// Generate throwaway self-signed credentials instead of loading PEMs.
    /// Peers will only interoperate with --insecure verification or the
    /// same material; meant for local experiments.
    #[arg(long)]
    self_signed: bool,
}

impl CredentialArgs {
    fn load(&self) -> ferry_core::Result<Credentials> {
        if self.self_signed {
            return Credentials::self_signed(&["localhost", "127.0.0.1"]);
        }
        // clap enforces presence when --self-signed is absent.
        let cert = self
            .cert
            .as_deref()
            .ok_or_else(|| ferry_core::Error::Credentials("--cert is required".to_string()))?;
        let key = self
            .key
            .as_deref()
            .ok_or_else(|| ferry_core::Error::Credentials("--key is required".to_string()))?;
        Credentials::from_pem_files(cert, key)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry=info,ferry_core=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ferry_core::Result<()> {
    match cli.command {
        Command::Listen {
            addr,
            storage_dir,
            settings,
            max_iterations,
            credentials,
        } => {
            let settings = match settings {
                Some(path) => Settings::load(path)?,
                None => Settings {
                    storage_dir: storage_dir.unwrap_or_else(|| PathBuf::from(".")),
                },
            };
            let creds = credentials.load()?;
            let registry = Arc::new(TransferRegistry::from_settings(&settings));
            accept_and_serve(
                &addr,
                registry,
                &creds,
                max_iterations.unwrap_or(usize::MAX),
            )
            .await
        }

        Command::Send {
            addr,
            file,
            uuid,
            flow_name,
            chunk_size,
            transport,
            quic_addr,
            timeout_secs,
            insecure,
            credentials,
        } => {
            let creds = credentials.load()?.with_insecure_skip_verify(insecure);
            let size = tokio::fs::metadata(&file)
                .await
                .map_err(|e| ferry_core::Error::StreamIo(format!("stat {}: {e}", file.display())))?
                .len();
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unnamed".to_string());
            let source = ByteStream::open(&file).await?;

            let meta = FileMetadata {
                uuid: uuid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                filename,
                flow_name,
                size,
                chunk_size,
                availability: None,
                metadata: HashMap::new(),
                transport,
                quic_addr,
            };
            run_sender(
                &addr,
                meta,
                source,
                Duration::from_secs(timeout_secs),
                &creds,
            )
            .await
        }
    }
}
