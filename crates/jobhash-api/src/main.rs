use anyhow::Context;
use clap::Parser;
use jobhash::Algorithm;
use jobhash_api::engine::Engine;
use jobhash_api::{server, tls};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A delayed password-hashing API with graceful drain semantics.
#[derive(Debug, Parser)]
#[command(about, version)]
struct Cli {
    /// 'hybrid' (serve both HTTP and HTTPS), 'exclusive' (HTTPS only), or
    /// 'disabled' (HTTP only).
    #[arg(long = "sslmode", value_enum, default_value = "hybrid", env = "SSLMODE")]
    ssl_mode: SslMode,
    /// Port to use for HTTP.
    #[arg(long, default_value_t = 80, env = "PORT")]
    port: u32,
    /// Port to use for HTTPS.
    #[arg(long = "sslport", default_value_t = 443, env = "SSLPORT")]
    ssl_port: u32,
    /// Number of seconds to delay each hashing request's persistence.
    #[arg(long, default_value_t = 5, env = "DELAY")]
    delay: u64,
    /// Path to the server X509 certificate in PEM format. If a
    /// certificate/key pair is not found and SSL is enabled, a self-signed
    /// one is generated into this file.
    #[arg(long = "sslcert", default_value = "server.crt", env = "SSLCERT")]
    ssl_cert: PathBuf,
    /// Path to the server private key. If a certificate/key pair is not
    /// found and SSL is enabled, an elliptic key on NIST P-256 is generated
    /// into this file.
    #[arg(long = "sslkey", default_value = "server.pem", env = "SSLKEY")]
    ssl_key: PathBuf,
    /// Target concurrency for the worker pool and store sharding.
    #[arg(long, default_value_t = default_concurrency(), env = "CONCURRENCY")]
    concurrency: usize,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum SslMode {
    Hybrid,
    Exclusive,
    Disabled,
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(Into::into)
        .unwrap_or(1)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reasonable defaults for printing structured logs to stderr.
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let cli = Cli::parse();

    if cli.port > 65535 {
        anyhow::bail!("port {} exceeds max port number 65535", cli.port);
    }
    if cli.ssl_port > 65535 {
        anyhow::bail!("HTTPS port {} exceeds max port number 65535", cli.ssl_port);
    }

    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("installing default crypto provider");

    let engine = Engine::start(
        cli.concurrency,
        Algorithm::Sha512,
        Duration::from_secs(cli.delay),
    );
    let router = server::build_router(engine.clone());

    // Ctrl-C performs the same graceful drain as GET /shutdown.
    let interrupted = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received interrupt, commencing shutdown");
            interrupted.stop().await;
        }
    });

    let handle = axum_server::Handle::new();
    let mut listeners = Vec::new();

    if cli.ssl_mode != SslMode::Disabled {
        if !tls::cert_exists(&cli.ssl_key, &cli.ssl_cert) {
            tracing::info!(
                cert = %cli.ssl_cert.display(),
                key = %cli.ssl_key.display(),
                "certificate/key pair not found, generating a self-signed one",
            );
            tls::generate_self_signed(&cli.ssl_key, &cli.ssl_cert)?;
        }
        let config = tls::load_rustls_config(&cli.ssl_cert, &cli.ssl_key)?;

        let addr = SocketAddr::from(([0, 0, 0, 0], cli.ssl_port as u16));
        let listener = std::net::TcpListener::bind(addr)
            .with_context(|| format!("binding HTTPS port {}", cli.ssl_port))?;
        listener.set_nonblocking(true)?;

        let server = axum_server::from_tcp_rustls(listener, config)
            .handle(handle.clone())
            .serve(router.clone().into_make_service());
        tracing::info!(port = cli.ssl_port, "server now accepting SSL connections");
        listeners.push(tokio::spawn(server));
    }

    if cli.ssl_mode != SslMode::Exclusive {
        let addr = SocketAddr::from(([0, 0, 0, 0], cli.port as u16));
        let listener = std::net::TcpListener::bind(addr)
            .with_context(|| format!("binding HTTP port {}", cli.port))?;
        listener.set_nonblocking(true)?;

        let server = axum_server::from_tcp(listener)
            .handle(handle.clone())
            .serve(router.clone().into_make_service());
        tracing::info!(port = cli.port, "server now accepting http connections");
        listeners.push(tokio::spawn(server));
    }

    // The engine signals termination once draining completes; stop the
    // listeners and let the process exit.
    engine.terminated().cancelled().await;
    handle.graceful_shutdown(Some(Duration::from_secs(1)));
    for listener in listeners {
        listener.await.context("joining listener task")??;
    }

    tracing::info!("shutdown complete");
    Ok(())
}
