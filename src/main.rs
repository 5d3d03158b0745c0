//! dualnet - send one request over a plain or TLS connection and print the reply

use std::path::PathBuf;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use dualnet::config::{ClientOptions, LogConfig, TlsOptions};
use dualnet::error::{Error, Result};
use dualnet::{Client, PlainClient, SecureClient};

fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        print_version();
        return Ok(());
    }

    let (Some(host), Some(port)) = (args.host.clone(), args.port) else {
        print_help();
        std::process::exit(1);
    };

    // Load configuration
    let mut options = match &args.config {
        Some(path) => ClientOptions::load(path)?,
        None => ClientOptions::default(),
    };
    if let Some(ca) = &args.ca {
        options.tls.get_or_insert_with(TlsOptions::default).ca_chain_file = Some(ca.clone());
    }

    init_logging(&options.log)?;

    let secure = args.tls || args.ca.is_some();
    let mut client: Box<dyn Client> = if secure {
        Box::new(SecureClient::from_options(&options)?)
    } else {
        Box::new(PlainClient::from_options(&options))
    };

    info!("dualnet v{} connecting to {}:{}", env!("CARGO_PKG_VERSION"), host, port);
    client.connect(&host, port)?;

    let request = match &args.request {
        Some(request) => request.replace("\\r", "\r").replace("\\n", "\n"),
        None => format!("HEAD / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", host),
    };
    client.write_data(request.as_bytes())?;

    let reply = client.read_data(false);
    info!("[{}] Received {} bytes", client.name(), reply.len());
    print!("{}", String::from_utf8_lossy(&reply));

    client.disconnect();
    Ok(())
}

/// RUST_LOG wins over the configured level
fn init_logging(log: &LogConfig) -> Result<()> {
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .or_else(|| log.level.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Config(format!("Failed to set tracing subscriber: {}", e)))
}

/// Command line arguments
struct Args {
    config: Option<PathBuf>,
    tls: bool,
    ca: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    request: Option<String>,
    version: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut config = None;
        let mut tls = false;
        let mut ca = None;
        let mut positional = Vec::new();
        let mut version = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-c" | "--config" => {
                    if i + 1 < args.len() {
                        config = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--ca" => {
                    if i + 1 < args.len() {
                        ca = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--tls" => tls = true,
                "-v" | "--version" => version = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                arg if !arg.starts_with('-') => positional.push(arg.to_string()),
                _ => {}
            }
            i += 1;
        }

        let mut positional = positional.into_iter();
        let host = positional.next();
        let port = positional.next().and_then(|p| p.parse().ok());
        let request = positional.next();

        Self { config, tls, ca, host, port, request, version }
    }
}

fn print_help() {
    println!(r#"dualnet - plain/TLS byte-stream client

USAGE:
    dualnet [OPTIONS] HOST PORT [REQUEST]

OPTIONS:
    -c, --config <FILE>     Path to JSON client options
    --tls                   Connect over TLS (unverified unless a CA chain is set)
    --ca <FILE>             PEM CA chain; implies --tls and requires verification
    -v, --version           Print version information
    -h, --help              Print help information

REQUEST defaults to "HEAD / HTTP/1.1" with a Host header. "\r" and "\n"
escapes in REQUEST are expanded.

EXAMPLES:
    dualnet example.com 80
    dualnet --tls example.com 443
    dualnet --ca ca.pem -c client.json internal.host 8443 'PING\r\n'
"#);
}

fn print_version() {
    println!("dualnet v{}", env!("CARGO_PKG_VERSION"));
    println!("Plain and TLS byte-stream clients behind one contract");
}
