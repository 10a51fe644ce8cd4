//! dns-rewrite-proxy - answer configured names locally, forward the rest
//!
//! Listens for DNS queries over UDP, replies with a single A record for
//! names matching a local rule and relays everything else to an upstream
//! resolver with a remapped transaction ID.

use dns_rewrite_proxy::config::{load_config, RecordConfig};
use dns_rewrite_proxy::dns::run_dns_server;
use dns_rewrite_proxy::logging;

use std::env;
use tracing::error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args: Vec<String> = env::args().collect();

    // Parse command line arguments
    let mut config_path: Option<&str> = None;
    let mut cli_listen: Option<String> = None;
    let mut cli_upstream: Option<String> = None;
    let mut cli_records: Vec<RecordConfig> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                config_path = args.get(i).map(|s| s.as_str());
            }
            "--listen" | "-l" => {
                i += 1;
                cli_listen = args.get(i).cloned();
            }
            "--upstream" | "-u" => {
                i += 1;
                cli_upstream = args.get(i).cloned();
            }
            "--record" | "-r" => {
                i += 1;
                match args.get(i) {
                    Some(arg) => cli_records.push(RecordConfig::parse_cli(arg)?),
                    None => {
                        eprintln!("--record needs a DOMAIN=IP argument");
                        std::process::exit(1);
                    }
                }
            }
            "-h" | "--help" => {
                print_usage(&args[0]);
                return Ok(());
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage(&args[0]);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    // Load config from file
    let mut config = load_config(config_path)?;

    // CLI arguments override config file
    if let Some(listen) = cli_listen {
        config.dns.listen = listen;
    }
    if let Some(upstream) = cli_upstream {
        config.dns.upstream = Some(upstream);
    }
    config.records.extend(cli_records);

    // Initialize logging system
    let _log_guard = logging::init_logging(&config.logging);

    // Compress and prune rotated log files
    logging::spawn_log_maintenance(&config.logging);

    tracing::debug!(config = ?config, "Configuration loaded");

    println!("DNS rewrite proxy listening on {}", config.dns.listen);
    println!("Local records: {}", config.records.len());

    if let Err(e) = run_dns_server(&config).await {
        error!(error = %e, "DNS server error");
        return Err(e.into());
    }

    Ok(())
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [options]", program);
    eprintln!();
    eprintln!("DNS proxy that answers matching names with a fixed IPv4 address");
    eprintln!("and forwards all other queries to an upstream resolver.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <path>       Load config from YAML file");
    eprintln!("  -l, --listen <addr>       UDP address to listen on (default: 0.0.0.0:53)");
    eprintln!("  -u, --upstream <addr>     Upstream resolver, \"auto\" or \"none\" (default: auto)");
    eprintln!("  -r, --record <name=ip>    Add a local record, may be repeated");
    eprintln!("  -h, --help                Show this help message");
    eprintln!();
    eprintln!("Patterns:");
    eprintln!("  tc.fritz.box              exact name");
    eprintln!("  *.fritz.box               any name ending in .fritz.box");
    eprintln!();
    eprintln!("Examples:");
    eprintln!(
        "  {} -r tc.fritz.box=192.168.178.2                  # Forward via resolv.conf",
        program
    );
    eprintln!(
        "  {} -l 127.0.0.1:5353 -u none -r '*.lan=10.0.0.1'  # Local only",
        program
    );
    eprintln!(
        "  {} --config config.yaml                           # Use config file",
        program
    );
}
