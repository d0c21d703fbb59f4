//! CLI argument parsing and command dispatch.

pub mod args;

use anyhow::{Context, Result};
use args::{BuildArgs, CallArgs, Cli, Commands, IdentityArgs, PairArgs, ServeArgs};
use clap::Parser;
use lanpin_ca::{derive_identity, identity_of_root, CertStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::client::{ClientRequest, ClientTlsFiles};
use crate::config::Settings;
use crate::{pairing, startup};

/// Run the CLI application.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut settings = Settings::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(dir) = cli.cert_dir {
        settings.cert_dir = dir;
    }

    match cli.command {
        Commands::Serve(args) => serve(settings, args).await,
        Commands::Build(args) => build(settings, &args).await,
        Commands::Identity(args) => identity(&settings, args),
        Commands::Pair(args) => pair(&settings, args),
        Commands::Call(args) => call(&settings, args).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "lanpin=debug,lanpin_ca=debug"
    } else {
        "lanpin=info,lanpin_ca=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Fold `serve` flags into the loaded settings.
fn apply_serve_args(settings: &mut Settings, args: ServeArgs) -> crate::Result<()> {
    if let Some(bind) = args.bind {
        settings.bind_address = bind;
    }
    if let Some(port) = args.front_port {
        settings.ports.front = port;
    }
    if let Some(port) = args.backend_port {
        settings.ports.backend = port;
    }
    if let Some(mode) = args.client_auth {
        settings.client_auth = mode;
    }
    if let Some(alg) = args.algorithm {
        settings.key_algorithm = alg;
    }
    if let Some(path) = args.qr_path {
        settings.qr_path = path;
    }
    settings.announce &= !args.no_announce;
    settings.emit_qr &= !args.no_qr;
    settings.validate()
}

async fn serve(mut settings: Settings, args: ServeArgs) -> Result<()> {
    apply_serve_args(&mut settings, args)?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("interrupt received");
    };
    startup::run(&settings, shutdown).await?;
    Ok(())
}

async fn build(mut settings: Settings, args: &BuildArgs) -> Result<()> {
    if let Some(alg) = args.algorithm {
        settings.key_algorithm = alg;
    }
    let material = startup::build_chain(&settings).await?;

    if args.json {
        let out = serde_json::json!({
            "identity": material.identity,
            "fingerprint": material.fingerprint.to_string(),
            "store": material.store.base(),
            "root": material.root,
            "leaf": material.leaf,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("identity:    {}", material.identity);
        println!("fingerprint: {}", material.fingerprint);
        println!("root:        {}", material.store.ca_cert().display());
        println!("leaf:        {}", material.store.server_cert().display());
    }
    Ok(())
}

fn stored_identity(settings: &Settings) -> Result<lanpin_ca::Identity> {
    let store = CertStore::new(&settings.cert_dir);
    let pem = store
        .read(&store.ca_cert())
        .context("no root certificate, run `lanpin build` first")?;
    Ok(identity_of_root(&pem)?)
}

fn identity(settings: &Settings, args: IdentityArgs) -> Result<()> {
    let identity = match args.fingerprint {
        Some(text) => derive_identity(&text)?,
        None => stored_identity(settings)?,
    };
    println!("{identity}");
    Ok(())
}

fn pair(settings: &Settings, args: PairArgs) -> Result<()> {
    let identity = stored_identity(settings)?;
    let port = args.port.unwrap_or(settings.ports.front);
    let output = args.output.unwrap_or_else(|| settings.qr_path.clone());

    pairing::emit_to_file(&identity, port, &output)?;
    println!("{}", pairing::render_terminal(&identity, port)?);
    println!("Scan to open {}", identity.url(port));
    Ok(())
}

async fn call(settings: &Settings, args: CallArgs) -> Result<()> {
    let defaults = ClientTlsFiles::from_store(&CertStore::new(&settings.cert_dir));
    let files = ClientTlsFiles {
        key: args.key.unwrap_or(defaults.key),
        cert: args.cert.unwrap_or(defaults.cert),
        ca: args.ca.unwrap_or(defaults.ca),
    };

    let mut request = ClientRequest::new(&args.host, args.port, &args.path, &args.method, files)?
        .insecure(args.insecure);
    if let Some(body) = args.body {
        request = request.body(body);
    }
    if let Some(addr) = args.connect_to {
        request = request.connect_to(addr);
    }

    let status = request.send(&mut std::io::stdout()).await?;
    println!();
    if !status.is_success() {
        anyhow::bail!("server answered {status}");
    }
    Ok(())
}
