mod config;
mod error;
mod simulated;

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use policy::{Capability, CapabilityOutcome, ResolutionContext, Resolver, rules::Operation};
use runtime::{ChannelInteraction, Decision, Orchestrator, Prompt, RequestReport};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use config::Config;
use error::{Error, Result};
use simulated::SimulatedPlatform;

const CONFIG_FILE: &str = "permit.toml";
const PERMISSION_PREFIX: &str = "android.permission.";

#[derive(Parser)]
#[command(name = "permit")]
#[command(about = "Resolve and request Android permissions against a simulated device", long_about = None)]
#[command(version)]
struct Cli {
    /// Device profile (defaults to ./permit.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the device API level
    #[arg(long, global = true)]
    runtime: Option<u32>,

    /// Override the application's target API level
    #[arg(long, global = true)]
    target: Option<u32>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every known capability
    Catalog,
    /// Show grant state and remediation for capabilities
    Check {
        /// Capability identifiers (the android.permission. prefix is optional)
        #[arg(required = true)]
        capabilities: Vec<String>,
    },
    /// Show which rule set answers each question for a capability
    Rules {
        capability: String,
    },
    /// Run a full request session
    Request {
        #[arg(required = true)]
        capabilities: Vec<String>,
        /// Answer explanations and settings offers on stdin
        #[arg(short, long)]
        interactive: bool,
    },
    /// Ask for capabilities to be revoked when the process dies
    Revoke {
        #[arg(required = true)]
        capabilities: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    let ctx = config.context(cli.runtime, cli.target);
    debug!(%ctx, "device context");

    match cli.command {
        Commands::Catalog => cmd_catalog(cli.json),
        Commands::Check { capabilities } => cmd_check(&config, ctx, &capabilities, cli.json),
        Commands::Rules { capability } => cmd_rules(ctx, &capability, cli.json),
        Commands::Request {
            capabilities,
            interactive,
        } => cmd_request(&config, ctx, &capabilities, interactive, cli.json).await,
        Commands::Revoke { capabilities } => cmd_revoke(&config, ctx, &capabilities),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None if Path::new(CONFIG_FILE).exists() => Ok(Config::load(CONFIG_FILE)?),
        None => Ok(Config::default()),
    }
}

/// Accept `CAMERA` as well as `android.permission.CAMERA`.
fn qualify(id: &str) -> String {
    let id = id.trim();
    if id.contains('.') {
        id.to_string()
    } else {
        format!("{PERMISSION_PREFIX}{id}")
    }
}

fn parse_capability(id: &str) -> Result<Capability> {
    Ok(Capability::parse(&qualify(id))?)
}

fn parse_capabilities(ids: &[String]) -> Result<Vec<Capability>> {
    let ids: Vec<_> = ids.iter().map(|id| qualify(id)).collect();
    Ok(runtime::validator::parse_ids(&ids)?)
}

fn short(capability: Capability) -> &'static str {
    capability
        .as_str()
        .strip_prefix(PERMISSION_PREFIX)
        .unwrap_or(capability.as_str())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct CatalogEntry {
    capability: Capability,
    kind: policy::CapabilityKind,
    introduced_at: policy::ApiLevel,
    dedicated_stage: bool,
}

fn cmd_catalog(json: bool) -> Result<()> {
    let entries: Vec<_> = Capability::ALL
        .iter()
        .map(|c| CatalogEntry {
            capability: *c,
            kind: c.kind(),
            introduced_at: c.introduced_at(),
            dedicated_stage: c.has_dedicated_stage(),
        })
        .collect();
    if json {
        return print_json(&entries);
    }

    println!("{:<42}  {:<8}  {:<16}  STAGE", "CAPABILITY", "KIND", "SINCE");
    println!("{}", "-".repeat(80));
    for entry in entries {
        let kind = match entry.kind {
            policy::CapabilityKind::Runtime => "runtime",
            policy::CapabilityKind::Special => "special",
        };
        println!(
            "{:<42}  {:<8}  {:<16}  {}",
            short(entry.capability),
            kind,
            entry.introduced_at.to_string(),
            if entry.dedicated_stage { "dedicated" } else { "" }
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct CheckEntry {
    capability: Capability,
    outcome: CapabilityOutcome,
    remediation: policy::RemediationTarget,
}

fn cmd_check(config: &Config, ctx: ResolutionContext, ids: &[String], json: bool) -> Result<()> {
    let capabilities = parse_capabilities(ids)?;
    let platform = SimulatedPlatform::from_config(config);
    let resolver = Resolver::new();

    let mut entries = Vec::with_capacity(capabilities.len());
    for capability in capabilities {
        entries.push(CheckEntry {
            capability,
            outcome: resolver.outcome(capability, &ctx, &platform)?,
            remediation: resolver.remediation_target(capability, &ctx, &platform)?,
        });
    }
    if json {
        return print_json(&entries);
    }

    println!("Device: {ctx}\n");
    for entry in entries {
        println!(
            "{:<42}  {:<20}  {}",
            short(entry.capability),
            entry.outcome.to_string(),
            entry.remediation
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct RuleEntry {
    operation: Operation,
    rule_set: &'static str,
    rule: String,
}

#[derive(Serialize)]
struct RulesOutput {
    chain: Vec<(&'static str, policy::ApiLevel)>,
    rules: Vec<RuleEntry>,
}

fn cmd_rules(ctx: ResolutionContext, id: &str, json: bool) -> Result<()> {
    let capability = parse_capability(id)?;
    let resolver = Resolver::new();

    let mut entries = Vec::new();
    for operation in [
        Operation::IsGranted,
        Operation::IsPermanentlyRefused,
        Operation::RemediationTarget,
    ] {
        let resolution = resolver.resolve(capability, operation, &ctx)?;
        entries.push(RuleEntry {
            operation,
            rule_set: resolution.rule_set,
            rule: format!("{:?}", resolution.rule),
        });
    }
    let chain = resolver.thresholds();
    if json {
        return print_json(&RulesOutput {
            chain,
            rules: entries,
        });
    }

    let chain: Vec<_> = chain
        .iter()
        .map(|(name, level)| format!("{name} ({})", level.0))
        .collect();
    println!("{capability} on {ctx}");
    println!("Chain: {}\n", chain.join(" > "));
    for entry in entries {
        println!(
            "{:<24}  {:<10}  {}",
            entry.operation.to_string(),
            entry.rule_set,
            entry.rule
        );
    }
    Ok(())
}

async fn cmd_request(
    config: &Config,
    ctx: ResolutionContext,
    ids: &[String],
    interactive: bool,
    json: bool,
) -> Result<()> {
    let capabilities = parse_capabilities(ids)?;
    let platform = Arc::new(SimulatedPlatform::from_config(config));

    let (bridge, prompts) = ChannelInteraction::new(1);
    let bridge = bridge
        .with_explanation(config.behavior.explain)
        .with_remediation(config.behavior.forward);
    let host = tokio::spawn(answer_prompts(
        prompts,
        config.behavior.user_accepts,
        interactive,
    ));

    let orchestrator = Orchestrator::new(platform)
        .with_interaction(Arc::new(bridge))
        .with_options(config.options());

    let (tx, rx) = tokio::sync::oneshot::channel();
    orchestrator.submit(capabilities, ctx, move |result| {
        let _ = tx.send(result);
    });
    drop(orchestrator);

    let report = rx.await.map_err(|_| Error::NoReport)??;
    host.abort();

    if json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

/// Answer prompts as the simulated user, or from stdin.
async fn answer_prompts(mut prompts: mpsc::Receiver<Prompt>, accept: bool, interactive: bool) {
    while let Some(prompt) = prompts.recv().await {
        let question = match &prompt {
            Prompt::Explain { request, .. } if request.before_request => "Why we need",
            Prompt::Explain { .. } => "Still needed",
            Prompt::Remediate { .. } => "Open settings for",
        };
        let names: Vec<_> = prompt.capabilities().iter().map(|c| short(*c)).collect();
        let text = format!("{question}: {}", names.join(", "));

        let decision = if interactive {
            match tokio::task::spawn_blocking(move || ask(&text)).await {
                Ok(Ok(true)) => Decision::Proceed,
                _ => Decision::Decline,
            }
        } else {
            eprintln!("{text} -> {}", if accept { "proceed" } else { "decline" });
            if accept {
                Decision::Proceed
            } else {
                Decision::Decline
            }
        };
        if !prompt.answer(decision) {
            break;
        }
    }
}

fn ask(text: &str) -> io::Result<bool> {
    let mut stderr = io::stderr();
    write!(stderr, "{text} [y/N] ")?;
    stderr.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

fn print_report(report: &RequestReport) {
    println!("Session: {}", report.session);
    println!(
        "Result:  {}",
        if report.all_granted {
            "all granted"
        } else {
            "not all granted"
        }
    );
    for capability in &report.granted {
        println!("  granted             {}", short(*capability));
    }
    for capability in &report.denied {
        let label = if report.permanently_denied.contains(capability) {
            "permanently denied"
        } else {
            "denied"
        };
        println!("  {label:<18}  {}", short(*capability));
    }
}

fn cmd_revoke(config: &Config, ctx: ResolutionContext, ids: &[String]) -> Result<()> {
    let capabilities = parse_capabilities(ids)?;
    let platform = Arc::new(SimulatedPlatform::from_config(config));
    let orchestrator = Orchestrator::new(Arc::clone(&platform));

    if orchestrator.revoke_on_kill(&capabilities, &ctx) {
        let names: Vec<_> = platform
            .pending_revocations()
            .into_iter()
            .map(short)
            .collect();
        println!("Revoke on kill: {}", names.join(", "));
    } else {
        println!("Revoke on kill not available on {ctx}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_capability_accepts_short_names() {
        assert_eq!(parse_capability("CAMERA").unwrap(), Capability::Camera);
        assert_eq!(
            parse_capability("android.permission.CAMERA").unwrap(),
            Capability::Camera
        );
        assert!(parse_capability("TELEPORT").is_err());
        assert!(parse_capability("com.example.permission.X").is_err());
    }

    #[test]
    fn test_short_strips_prefix() {
        assert_eq!(short(Capability::Camera), "CAMERA");
        assert_eq!(
            short(Capability::AddVoicemail),
            "com.android.voicemail.permission.ADD_VOICEMAIL"
        );
    }

    #[test]
    fn test_cli_parses_request() {
        let cli = Cli::try_parse_from(["permit", "--runtime", "31", "request", "CAMERA", "-i"]).unwrap();
        assert_eq!(cli.runtime, Some(31));
        assert!(matches!(
            cli.command,
            Commands::Request { interactive: true, .. }
        ));
    }

    #[test]
    fn test_parse_capabilities_reports_unknown_ids() {
        let ids = ["CAMERA".to_string(), "FLY".to_string()];
        let err = parse_capabilities(&ids).unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
        assert!(err.to_string().contains("android.permission.FLY"));

        let ids = ["CAMERA".to_string(), " RECORD_AUDIO ".to_string()];
        assert_eq!(
            parse_capabilities(&ids).unwrap(),
            vec![Capability::Camera, Capability::RecordAudio]
        );
    }

    #[test]
    fn test_rules_for_every_context() {
        let config = Config::default();
        for runtime in [14, 23, 28, 33] {
            cmd_rules(config.context(Some(runtime), None), "ACCESS_BACKGROUND_LOCATION", true)
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_request_against_default_profile() {
        let config = Config::default();
        let ctx = config.context(None, None);
        cmd_request(&config, ctx, &["CAMERA".to_string()], false, true)
            .await
            .unwrap();
    }
}
