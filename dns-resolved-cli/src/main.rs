//! `resolved-link`: inspect or update one link's DNS settings in systemd-resolved.
//!
//! Updates are queued the same way a configuration service would queue them;
//! the tool then waits for the background worker and reports what happened.
//!
//! Exit codes: `0` success, `1` failure, `2` link not (yet) known to the resolver.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use dns_resolved_proxy::{
    CallOutcome, Completion, ErrorRecord, Link, Manager, ResolvedConfig, ResolvedError,
    SearchDomain,
};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const EXIT_FAILURE: u8 = 1;
const EXIT_LINK_UNKNOWN: u8 = 2;

/// Per-link DNS settings through systemd-resolved
#[derive(Parser)]
#[command(name = "resolved-link", author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,

    /// Network device, e.g. tun0
    device: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the link's current settings
    Show,

    /// Replace the DNS servers
    SetDns {
        #[arg(required = true)]
        servers: Vec<IpAddr>,
    },

    /// Replace search domains; `name:route` or `~name` marks a routing-only domain
    SetDomains {
        #[arg(required = true, value_parser = parse_domain)]
        domains: Vec<SearchDomain>,
    },

    /// Use the link for the default DNS route
    DefaultRoute {
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },

    /// Set DNSSEC mode (yes, no, allow-downgrade)
    Dnssec { mode: String },

    /// Set DNS-over-TLS mode (no, false, yes, true, opportunistic)
    DnsOverTls { mode: String },

    /// Drop every per-link override
    Revert,

    /// Print and clear recorded failures
    Errors,
}

fn parse_domain(arg: &str) -> std::result::Result<SearchDomain, String> {
    let (name, routing) = if let Some(name) = arg.strip_prefix('~') {
        (name, true)
    } else if let Some(name) = arg.strip_suffix(":route") {
        (name, true)
    } else {
        (arg, false)
    };
    if name.is_empty() {
        return Err(format!("empty domain in '{arg}'"));
    }
    Ok(SearchDomain::new(name, routing))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LinkReport {
    device: String,
    if_index: i32,
    object_path: String,
    dns_servers: Vec<IpAddr>,
    current_dns_server: Option<IpAddr>,
    domains: Vec<SearchDomain>,
    default_route: bool,
    dnssec: String,
    dns_over_tls: String,
}

impl LinkReport {
    fn read(link: &Link) -> Result<Self> {
        Ok(Self {
            device: link.device_name().to_string(),
            if_index: link.if_index(),
            object_path: link.object_path().to_string(),
            dns_servers: link.get_dns_servers()?,
            current_dns_server: link.get_current_dns_server(),
            domains: link.get_domains()?,
            default_route: link.get_default_route()?,
            dnssec: link.get_dnssec()?,
            dns_over_tls: link.get_dns_over_tls()?,
        })
    }

    fn print(&self) {
        let servers: Vec<String> = self.dns_servers.iter().map(ToString::to_string).collect();
        let domains: Vec<String> = self
            .domains
            .iter()
            .map(|d| {
                if d.routing {
                    format!("~{}", d.search)
                } else {
                    d.search.clone()
                }
            })
            .collect();

        println!("{} (if_index {}): {}", self.device, self.if_index, self.object_path);
        println!("  DNS servers:    {}", servers.join(" "));
        println!(
            "  Current server: {}",
            self.current_dns_server
                .map_or_else(|| "-".to_string(), |a| a.to_string())
        );
        println!("  Domains:        {}", domains.join(" "));
        println!("  Default route:  {}", self.default_route);
        println!("  DNSSEC:         {}", self.dnssec);
        println!("  DNSOverTLS:     {}", self.dns_over_tls);
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateReport {
    applied: Vec<String>,
    outcome: &'static str,
    failures: Vec<String>,
    errors: Vec<ErrorRecord>,
}

impl UpdateReport {
    fn new(applied: Vec<String>, outcome: CallOutcome, errors: Vec<ErrorRecord>) -> Self {
        let (label, failures) = match outcome {
            CallOutcome::Succeeded => ("succeeded", Vec::new()),
            CallOutcome::Failed(messages) => ("failed", messages),
            CallOutcome::Discarded => ("discarded", Vec::new()),
            CallOutcome::Skipped => ("skipped", Vec::new()),
            CallOutcome::Cancelled => ("cancelled", Vec::new()),
        };
        Self {
            applied,
            outcome: label,
            failures,
            errors,
        }
    }

    fn is_success(&self) -> bool {
        matches!(self.outcome, "succeeded" | "skipped") && self.errors.is_empty()
    }

    fn print(&self) {
        if !self.applied.is_empty() {
            println!("applied: {}", self.applied.join(" "));
        }
        println!("outcome: {}", self.outcome);
        for failure in &self.failures {
            println!("  {failure}");
        }
        print_errors(&self.errors);
    }
}

fn print_errors(errors: &[ErrorRecord]) {
    for record in errors {
        println!(
            "{} {record}",
            record.recorded_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// What a command ended with; decides the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Done,
    Failed,
    LinkUnknown,
}

impl Outcome {
    fn from_errors(errors: &[ErrorRecord]) -> Self {
        if errors.is_empty() {
            Self::Done
        } else {
            Self::Failed
        }
    }

    fn from_update(report: &UpdateReport) -> Self {
        if report.is_success() {
            Self::Done
        } else {
            Self::Failed
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::Done => 0,
            Self::Failed => EXIT_FAILURE,
            Self::LinkUnknown => EXIT_LINK_UNKNOWN,
        }
    }
}

fn finish_update(link: &Link, completion: Completion, json: bool) -> Result<Outcome> {
    let applied = completion.applied().to_vec();
    let outcome = completion.wait();
    link.wait_for_outstanding_tasks();
    let report = UpdateReport::new(applied, outcome, link.get_errors());

    if json {
        print_json(&report)?;
    } else {
        report.print();
    }
    Ok(Outcome::from_update(&report))
}

fn run(cli: Cli) -> Result<Outcome> {
    let config = match &cli.config {
        Some(path) => ResolvedConfig::from_json_file(path)?,
        None => ResolvedConfig::default(),
    };
    let manager =
        Manager::connect_system(config).context("systemd-resolved integration unavailable")?;

    let Some(link) = manager.retrieve_link(&cli.device)? else {
        eprintln!("{}: not known to systemd-resolved (yet)", cli.device);
        return Ok(Outcome::LinkUnknown);
    };
    tracing::debug!("Using {link:?}");

    let completion = match cli.command {
        Command::Show => {
            let report = LinkReport::read(&link)?;
            if cli.json {
                print_json(&report)?;
            } else {
                report.print();
            }
            return Ok(Outcome::Done);
        }
        Command::Errors => {
            let errors = link.get_errors();
            if cli.json {
                print_json(&errors)?;
            } else {
                print_errors(&errors);
            }
            return Ok(Outcome::from_errors(&errors));
        }
        Command::SetDns { servers } => link.set_dns_servers(&servers)?,
        Command::SetDomains { domains } => link.set_domains(&domains)?,
        Command::DefaultRoute { enabled } => link.set_default_route(enabled)?,
        Command::Dnssec { mode } => link.set_dnssec(&mode)?,
        Command::DnsOverTls { mode } => link.set_dns_over_tls(&mode)?,
        Command::Revert => link.revert()?,
    };

    finish_update(&link, completion, cli.json)
}

/// Caller mistakes (bad mode, bad config) are not integration faults.
fn is_expected_failure(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<ResolvedError>()
        .is_some_and(ResolvedError::is_expected)
}

fn main() -> ExitCode {
    // stdout carries command output; logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_ansi(false),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let outcome = run(Cli::parse()).unwrap_or_else(|e| {
        if is_expected_failure(&e) {
            tracing::warn!("{e:#}");
        } else {
            tracing::error!("{e:#}");
        }
        eprintln!("error: {e:#}");
        Outcome::Failed
    });
    ExitCode::from(outcome.code())
}
