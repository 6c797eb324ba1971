//! Command-line driver for the DC locator.
//!
//! Exercises the three layers separately: `dns` runs a bare SRV discovery,
//! `ping` a single LDAP ping, `locate` the full DC locator. Enable log
//! output with `RUST_LOG=debug`.

use std::error::Error;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dclocator::dns::{DcType, DnsLocator, DnsLocatorRequest, SrvProtocol, SrvService};
use dclocator::{DcFlags, DcLocator, DcLocatorRequest};
use netlogon::{
    from_flags_string, LdapPingRequest, LdapPinger, NetlogonNtVersion, PingProtocol,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dclocate", about = "Active Directory DC locator", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full DC locator process
    Locate {
        /// Fully-qualified DNS domain name; defaults to the local host's
        /// domain
        #[arg(long)]
        domain: Option<String>,
        /// Restrict discovery to a site
        #[arg(long)]
        site: Option<String>,
        /// Pipe-delimited DC locator flags, e.g.
        /// "DS_GC_SERVER_REQUIRED|DS_RETURN_DNS_NAME"
        #[arg(long)]
        flags: Option<String>,
        /// Read timeout in milliseconds
        #[arg(long)]
        read_timeout: Option<u64>,
    },
    /// Look up SRV records for an Active Directory service
    Dns {
        /// Service token: ldap, kerberos, kpasswd or gc
        #[arg(long, default_value = "ldap")]
        service: SrvService,
        /// Protocol label, tcp or udp
        #[arg(long)]
        protocol: Option<SrvProtocol>,
        #[arg(long)]
        site: Option<String>,
        /// DC type token: dc, gc or pdc
        #[arg(long)]
        dc_type: Option<DcType>,
        domain: String,
        #[arg(long)]
        read_timeout: Option<u64>,
    },
    /// Send a single LDAP ping to a host
    Ping {
        host: String,
        /// Pipe-delimited NT version flags
        #[arg(long, default_value = "V5EX|VCS")]
        nt_version: String,
        #[arg(long)]
        dns_domain: Option<String>,
        #[arg(long)]
        dns_host_name: Option<String>,
        /// Ping over TCP instead of UDP
        #[arg(long)]
        tcp: bool,
        #[arg(long)]
        connect_timeout: Option<u64>,
        #[arg(long)]
        read_timeout: Option<u64>,
    },
}

fn millis(value: Option<u64>) -> Option<Duration> {
    value.map(Duration::from_millis)
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Command::Locate {
            domain,
            site,
            flags,
            read_timeout,
        } => {
            let mut request = DcLocatorRequest::new();
            request.domain_name = domain;
            request.site_name = site;
            if let Some(flags) = flags.as_deref() {
                request.flags = from_flags_string::<DcFlags>(flags)?;
            }
            request.read_timeout = millis(read_timeout);

            let info = DcLocator::new().locate(&request)?;
            println!("{info}");
        }
        Command::Dns {
            service,
            protocol,
            site,
            dc_type,
            domain,
            read_timeout,
        } => {
            let mut request = DnsLocatorRequest::new(service, domain);
            request.protocol = protocol;
            request.site_name = site;
            request.dc_type = dc_type;

            let mut builder = DnsLocator::builder();
            if let Some(timeout) = millis(read_timeout) {
                builder = builder.read_timeout(timeout);
            }
            let hosts = builder.build().locate(&request)?;
            if hosts.is_empty() {
                println!("no records for '{}'", request.lookup_name());
            }
            for host in hosts {
                println!("{host}");
            }
        }
        Command::Ping {
            host,
            nt_version,
            dns_domain,
            dns_host_name,
            tcp,
            connect_timeout,
            read_timeout,
        } => {
            let nt_version = from_flags_string::<NetlogonNtVersion>(&nt_version)?;
            let mut request = LdapPingRequest::new(host, nt_version);
            request.dns_domain = dns_domain;
            request.dns_host_name = dns_host_name;
            if tcp {
                request.protocol = PingProtocol::Tcp;
            }
            request.connect_timeout = millis(connect_timeout);
            request.read_timeout = millis(read_timeout);

            let response = LdapPinger::new().ping(&request)?;
            println!("{response}");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("dclocate: {error}");
            let mut source = error.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
