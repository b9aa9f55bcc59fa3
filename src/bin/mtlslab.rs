//! mtlslab: mutual-TLS lab server and client

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use mtlslab::driver::{self, DirectoryListing, DriverError, RequestHandler, Target};
use mtlslab::http::{HttpRequest, HttpResponse};
use mtlslab::tls::{
    ConfigError, EndpointConfig, LocalIdentity, PeerCertificateInfo, PeerVerify, TrustStore,
    VerificationPolicy, DEFAULT_HANDSHAKE_TIMEOUT_SECS,
};

#[derive(Debug, Parser)]
#[command(name = "mtlslab")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve a directory over HTTPS, optionally demanding client certificates
    Server(ServerArgs),
    /// Fetch one URL over HTTPS, presenting a client certificate
    Client(ClientArgs),
}

#[derive(Debug, Args)]
struct ServerArgs {
    /// Address to bind
    #[arg(long, env = "MTLSLAB_HOST", default_value = "localhost")]
    host: String,

    #[arg(long, env = "MTLSLAB_PORT", default_value_t = driver::DEFAULT_PORT)]
    port: u16,

    /// CA bundle used to verify client certificates
    #[arg(long, env = "MTLSLAB_CA", default_value = "../ca/ca.crt")]
    ca: PathBuf,

    #[arg(long, env = "MTLSLAB_CERT", default_value = "../server/server.crt")]
    cert: PathBuf,

    #[arg(long, env = "MTLSLAB_KEY", default_value = "../server/server.key")]
    key: PathBuf,

    /// Client certificate policy: none, optional or required
    #[arg(long, env = "MTLSLAB_VERIFY", default_value = "required")]
    verify: PeerVerify,

    /// Directory to serve
    #[arg(long, env = "MTLSLAB_ROOT", default_value = ".")]
    root: PathBuf,

    /// Handshake and I/O timeout, in seconds
    #[arg(long, default_value_t = DEFAULT_HANDSHAKE_TIMEOUT_SECS)]
    timeout: u64,
}

#[derive(Debug, Args)]
struct ClientArgs {
    #[arg(env = "MTLSLAB_URL", default_value = "https://localhost:4443")]
    url: String,

    /// CA bundle used to verify the server certificate
    #[arg(long, env = "MTLSLAB_CA", default_value = "../ca/ca.crt")]
    ca: PathBuf,

    #[arg(long, env = "MTLSLAB_CERT", default_value = "../client/client.crt")]
    cert: PathBuf,

    #[arg(long, env = "MTLSLAB_KEY", default_value = "../client/client.key")]
    key: PathBuf,

    /// Connect without presenting a client certificate
    #[arg(long)]
    no_cert: bool,

    /// Server certificate policy; none disables verification entirely
    #[arg(long, env = "MTLSLAB_VERIFY", default_value = "required")]
    verify: PeerVerify,

    /// Accept a trusted server certificate issued for any name
    #[arg(long)]
    no_hostname_check: bool,

    /// Name to send as SNI and check the server certificate against
    #[arg(long)]
    server_name: Option<String>,

    /// Handshake and I/O timeout, in seconds
    #[arg(long, default_value_t = DEFAULT_HANDSHAKE_TIMEOUT_SECS)]
    timeout: u64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    match cli.cmd {
        Command::Server(args) => run_server(args),
        Command::Client(args) => run_client(args),
    }
}

fn run_server(args: ServerArgs) -> ExitCode {
    let config = match server_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid server configuration");
            return ExitCode::FAILURE;
        }
    };

    let handler = LoggingHandler(DirectoryListing::new(&args.root));

    println!(
        "Starting HTTPS server ({} client certificates) on https://{}:{}",
        args.verify, args.host, args.port
    );
    println!("Press Ctrl+C to stop the server");

    match driver::serve(config, (args.host.as_str(), args.port), handler) {
        Ok(never) => match never {},
        Err(e) => {
            error!(error = %e, "server stopped");
            ExitCode::FAILURE
        }
    }
}

fn server_config(args: &ServerArgs) -> Result<EndpointConfig, ConfigError> {
    let identity = LocalIdentity::from_pem_files(&args.cert, &args.key)?;
    let mut builder = EndpointConfig::server()
        .identity(identity)
        .policy(args.verify.into())
        .handshake_timeout(Some(Duration::from_secs(args.timeout)));

    if args.verify != PeerVerify::None {
        builder = builder.trust_store(TrustStore::from_pem_file(&args.ca)?);
    }

    builder.build()
}

/// Print the client certificate subject of every request, then delegate
struct LoggingHandler(DirectoryListing);

impl RequestHandler for LoggingHandler {
    fn handle(&self, request: &HttpRequest, peer: Option<&PeerCertificateInfo>) -> HttpResponse {
        if let Some(cert) = peer {
            info!(subject = %cert.subject, "client certificate");
            for attribute in &cert.subject {
                info!("  {}: {}", attribute.attribute, attribute.value);
            }
        }
        self.0.handle(request, peer)
    }
}

fn run_client(args: ClientArgs) -> ExitCode {
    let target = match Target::parse(&args.url) {
        Ok(target) => target,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let target = match &args.server_name {
        Some(name) => target.with_server_name(name),
        None => target,
    };

    let config = match client_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid client configuration");
            return ExitCode::FAILURE;
        }
    };

    println!("Attempting to connect to {} with mTLS...", target);

    match driver::run(&config, &target) {
        Ok(exchange) => {
            if let Some(cert) = &exchange.peer_certificate {
                print_certificate(cert);
            }
            println!("\nServer Response:");
            println!("{}", exchange.response.body_text());

            if exchange.response.status().is_success() {
                println!("\nConnection successful! Mutual TLS authentication worked.");
                ExitCode::SUCCESS
            } else {
                println!("\nServer answered {}", exchange.response.status());
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn client_config(args: &ClientArgs) -> Result<EndpointConfig, ConfigError> {
    let policy = VerificationPolicy::from(args.verify).with_hostname_check(
        args.verify != PeerVerify::None && !args.no_hostname_check,
    );

    let mut builder = EndpointConfig::client()
        .policy(policy)
        .handshake_timeout(Some(Duration::from_secs(args.timeout)));

    if args.verify != PeerVerify::None {
        builder = builder.trust_store(TrustStore::from_pem_file(&args.ca)?);
    }
    if !args.no_cert {
        builder = builder.identity(LocalIdentity::from_pem_files(&args.cert, &args.key)?);
    }

    builder.build()
}

fn print_certificate(cert: &PeerCertificateInfo) {
    println!("\nServer Certificate Details:");

    println!("\nSubject:");
    for attribute in &cert.subject {
        println!("  {}: {}", attribute.attribute, attribute.value);
    }

    println!("\nIssuer:");
    for attribute in &cert.issuer {
        println!("  {}: {}", attribute.attribute, attribute.value);
    }

    println!("notBefore: {}", cert.not_before);
    println!("notAfter: {}", cert.not_after);
}

fn report(err: &DriverError) {
    println!("\n{}", err);

    let hints = err.hints();
    if !hints.is_empty() {
        println!("This might be due to:");
        for hint in hints {
            println!("- {}", hint);
        }
    }
}
