use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;

mod cli;
mod service;

use agentrt_core::{ConsentScope, ConsentToken, PlanRequest};
use agentrt_sandbox::Sandbox;
use agentrt_store::Store;
use cli::{Cli, Commands, OutputFormat};
use service::{AgentRuntime, PlanService};

fn parse_scope(raw: &str) -> Result<ConsentScope> {
    Ok(match raw {
        "read_fs" => ConsentScope::ReadFs,
        "write_fs" => ConsentScope::WriteFs,
        "delete_fs" => ConsentScope::DeleteFs,
        "list_fs" => ConsentScope::ListFs,
        "search_fs" => ConsentScope::SearchFs,
        "exec_shell" => ConsentScope::ExecShell,
        "git_ops" => ConsentScope::GitOps,
        "net_get" => ConsentScope::NetGet,
        "net_post" => ConsentScope::NetPost,
        "exec_code" => ConsentScope::ExecCode,
        other => bail!("unknown consent scope '{other}'"),
    })
}

fn consent_token(scopes: &[String]) -> Result<ConsentToken> {
    if scopes.iter().any(|s| s == "*") {
        return Ok(ConsentToken::wildcard());
    }
    let parsed: Result<Vec<ConsentScope>> = scopes.iter().map(|s| parse_scope(s)).collect();
    Ok(ConsentToken::new(parsed?))
}

fn read_json_arg(arg: Option<String>) -> Result<serde_json::Value> {
    let raw = match arg {
        Some(literal) if literal.starts_with('{') || literal.starts_with('[') => literal,
        Some(path) => std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?,
        None => std::io::read_to_string(std::io::stdin()).context("reading stdin")?,
    };
    serde_json::from_str(&raw).context("parsing JSON input")
}

fn print_result(format: &OutputFormat, value: &impl serde::Serialize, text: impl FnOnce() -> String) {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value).expect("serializable result")),
        OutputFormat::Text => println!("{}", text()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = agentrt_config::Config::from_env().context("loading configuration")?;

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let _lock = agentrt_lock::acquire_store_lock(&config.db_path, "agentrt cli").context("acquiring store lock")?;

    let store = Arc::new(Store::open(&config.db_path).context("opening durable store")?);
    std::fs::create_dir_all(&config.sandbox_root).with_context(|| format!("creating {}", config.sandbox_root.display()))?;
    let sandbox = Arc::new(Sandbox::new(config.sandbox_root.clone()).context("initializing sandbox root")?);
    let runtime = AgentRuntime::new(Arc::clone(&store), sandbox, &config);

    let now = chrono::Utc::now().timestamp_millis();

    match cli.command {
        Commands::Submit { file } => {
            let request: PlanRequest = serde_json::from_value(read_json_arg(file)?).context("parsing Plan request")?;
            let plan = runtime.submit(request, now)?;
            print_result(&cli.format, &plan, || format!("submitted plan {} ({} steps)", plan.id, plan.steps.len()));
        }
        Commands::Fetch { plan_id } => {
            let (plan, events) = runtime.fetch(&plan_id)?;
            let summary = format!("plan {} [{:?}] with {} event(s)", plan.id, plan.state, events.len());
            let combined = serde_json::json!({ "plan": plan, "events": events });
            print_result(&cli.format, &combined, || summary);
        }
        Commands::Run { plan_id, consent_scopes } => {
            let consent = if consent_scopes.is_empty() { None } else { Some(consent_token(&consent_scopes)?) };
            let plan = runtime.run(&plan_id, consent).await?;
            print_result(&cli.format, &plan, || format!("plan {} finished in state {:?}", plan.id, plan.state));
        }
        Commands::Act { capability, input, consent_scopes } => {
            let input = read_json_arg(input)?;
            let consent = consent_token(&consent_scopes)?;
            let output = runtime.act(&capability, input, &consent).await?;
            print_result(&cli.format, &output, || output.to_string());
        }
        Commands::Transcript { plan_id } => {
            let transcript = runtime.transcript(&plan_id)?;
            print_result(&cli.format, &transcript, || {
                let mut out = format!("plan {} '{}' [{}]", transcript.plan_id, transcript.title, transcript.state);
                for step in &transcript.steps {
                    out.push_str(&format!("\n  - {} '{}' ({}) [{}]", step.id, step.name, step.capability, step.state));
                    if let Some(error) = &step.error {
                        out.push_str(&format!(" error={error}"));
                    }
                }
                out
            });
        }
    }

    Ok(())
}
