/// UniMesh - Main entry point
///
/// Terminal client for UniMesh messaging, events and organizations
use anyhow::{bail, Context};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use unimesh_client::backend::{AuthApi, MemoryBackend};
use unimesh_client::{cli, ClientConfig, UniMesh};

#[derive(Parser)]
#[command(name = "unimesh")]
#[command(about = "UniMesh - campus messaging from the terminal")]
struct Args {
    /// Backend URL, e.g. https://xyz.supabase.co
    #[arg(long, env = "UNIMESH_URL")]
    url: Option<String>,

    /// Public anon key of the backend
    #[arg(long, env = "UNIMESH_ANON_KEY")]
    anon_key: Option<String>,

    /// Run against an in-process backend instead of the hosted one
    #[arg(long)]
    offline: bool,

    /// Directory for the local state database (default: ~/.unimesh)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Re-open a live subscription once after it fails
    #[arg(long)]
    resubscribe: bool,

    /// E-mail address to sign in with
    email: String,

    /// Password; only needed when there is no stored session
    #[arg(long, env = "UNIMESH_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Enable verbose logging (DEBUG level)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();

    info!("Starting UniMesh client");

    let mut client = if args.offline {
        connect_offline(&args).await?
    } else {
        connect_online(&args).await?
    };

    client
        .hub_mut()
        .load_conversations()
        .await
        .context("Failed to load conversations")?;
    if let Some(id) = client.restore_last_conversation().await? {
        info!("Re-opened conversation {}", id);
    }

    cli::run(&mut client).await?;
    client.sign_out().await.context("Sign-out failed")?;
    Ok(())
}

fn config_from(args: &Args, url: &str, anon_key: &str) -> ClientConfig {
    let mut config =
        ClientConfig::new(url, anon_key).with_resubscribe_on_error(args.resubscribe);
    if let Some(dir) = &args.config {
        config = config.with_state_dir(dir.clone());
    }
    config
}

async fn connect_online(args: &Args) -> anyhow::Result<UniMesh> {
    let (Some(url), Some(anon_key)) = (&args.url, &args.anon_key) else {
        bail!("--url and --anon-key (or UNIMESH_URL / UNIMESH_ANON_KEY) are required unless --offline is given");
    };
    let config = config_from(args, url, anon_key);
    info!("Backend: {}", config.base_url);

    if let Some(client) = UniMesh::resume(&config)
        .await
        .context("Failed to resume stored session")?
    {
        if client.session().email.eq_ignore_ascii_case(&args.email) {
            return Ok(client);
        }
        info!("Stored session belongs to another account");
    }

    let Some(password) = &args.password else {
        bail!("No stored session for {}; pass --password or set UNIMESH_PASSWORD", args.email);
    };
    UniMesh::connect_rest(&config, &args.email, password)
        .await
        .with_context(|| format!("Failed to sign in as {}", args.email))
}

/// In-process backend with the given account and one classmate to talk to
async fn connect_offline(args: &Args) -> anyhow::Result<UniMesh> {
    let backend = Arc::new(MemoryBackend::new());
    let password = args.password.clone().unwrap_or_else(|| "offline".to_string());
    backend.register_user(&args.email, &password, "Me");
    backend.register_user("classmate@unimesh.local", "offline", "Demo Classmate");

    let config = config_from(args, "http://localhost", "offline");
    let session = backend
        .sign_in(&args.email, &password)
        .await
        .context("Offline sign-in failed")?;
    info!("Running offline as {}", session.user_id);
    Ok(UniMesh::new(backend.clone(), backend, session, &config))
}
