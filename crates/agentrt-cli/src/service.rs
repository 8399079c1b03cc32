//! `PlanService`: the narrow trait SPEC_FULL.md §6 substitutes for the
//! HTTP surface spec.md §6 describes (submit/fetch/run/act/transcript).
//! `AgentRuntime` implements it directly against the library crates; an
//! out-of-scope transport crate could adapt the same trait to HTTP
//! without touching this workspace.

use std::sync::Arc;

use agentrt_core::{AppError, ConsentToken, Event, Plan, PlanRequest};
use agentrt_executor::{ExecutorConfig, PlanExecutor};
use agentrt_sandbox::Sandbox;
use agentrt_store::Store;
use agentrt_tools::{builtin_registry, ToolContext, ToolRegistry};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Per-Step view used by `transcript`, matching spec.md §6's
/// `{id,name,capability,deps,state,error,output_preview}` shape.
#[derive(Debug, Serialize)]
pub struct StepSummary {
    pub id: String,
    pub name: String,
    pub capability: String,
    pub deps: Vec<String>,
    pub state: String,
    pub error: Option<String>,
    pub output_preview: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Transcript {
    pub plan_id: String,
    pub title: String,
    pub state: String,
    pub steps: Vec<StepSummary>,
}

const OUTPUT_PREVIEW_CHARS: usize = 512;

fn preview(output: &Option<Value>) -> Option<String> {
    let output = output.as_ref()?;
    let rendered = output.to_string();
    if rendered.chars().count() <= OUTPUT_PREVIEW_CHARS {
        Some(rendered)
    } else {
        Some(rendered.chars().take(OUTPUT_PREVIEW_CHARS).collect())
    }
}

#[async_trait]
pub trait PlanService {
    fn submit(&self, request: PlanRequest, now: i64) -> Result<Plan, AppError>;
    fn fetch(&self, plan_id: &str) -> Result<(Plan, Vec<Event>), AppError>;
    async fn run(&self, plan_id: &str, consent: Option<ConsentToken>) -> Result<Plan, AppError>;
    async fn act(&self, capability: &str, input: Value, consent: &ConsentToken) -> Result<Value, AppError>;
    fn transcript(&self, plan_id: &str) -> Result<Transcript, AppError>;
}

/// Wires the Durable Store, Sandbox, Tool Registry, and Plan Executor
/// together behind `PlanService`, the way `cli-sub-agent`'s command
/// handlers wire a session directory and tool dispatcher behind each
/// subcommand.
pub struct AgentRuntime {
    store: Arc<Store>,
    registry: Arc<ToolRegistry>,
    tool_ctx: ToolContext,
    executor: PlanExecutor,
}

impl AgentRuntime {
    pub fn new(store: Arc<Store>, sandbox: Arc<Sandbox>, config: &agentrt_config::Config) -> Self {
        let registry = Arc::new(builtin_registry());
        let tool_ctx = ToolContext::new(Arc::clone(&sandbox));
        let executor_config = ExecutorConfig {
            concurrency: config.exec_concurrency,
            require_consent: config.require_consent,
            auto_consent: config.auto_consent,
        };
        let executor = PlanExecutor::new(Arc::clone(&store), Arc::clone(&registry), tool_ctx.clone(), executor_config);
        AgentRuntime { store, registry, tool_ctx, executor }
    }
}

#[async_trait]
impl PlanService for AgentRuntime {
    fn submit(&self, request: PlanRequest, now: i64) -> Result<Plan, AppError> {
        agentrt_executor::submit_plan(&self.store, request, now)
    }

    fn fetch(&self, plan_id: &str) -> Result<(Plan, Vec<Event>), AppError> {
        let plan = self.store.get_plan(plan_id)?;
        let events = self.store.events_for_plan(plan_id)?;
        Ok((plan, events))
    }

    async fn run(&self, plan_id: &str, consent: Option<ConsentToken>) -> Result<Plan, AppError> {
        self.executor.run_by_id(plan_id, consent).await
    }

    async fn act(&self, capability: &str, input: Value, consent: &ConsentToken) -> Result<Value, AppError> {
        let capability = agentrt_core::CapabilityRef::new(capability);
        self.registry.invoke(&capability, input, consent, &self.tool_ctx).await
    }

    fn transcript(&self, plan_id: &str) -> Result<Transcript, AppError> {
        let plan = self.store.get_plan(plan_id)?;
        let steps = plan
            .steps
            .iter()
            .map(|step| StepSummary {
                id: step.id.clone(),
                name: step.name.clone(),
                capability: step.capability.name.clone(),
                deps: step.deps.clone(),
                state: format!("{:?}", step.state),
                error: step.last_error.clone(),
                output_preview: preview(&step.output),
            })
            .collect();
        Ok(Transcript { plan_id: plan.id.clone(), title: plan.title.clone(), state: format!("{:?}", plan.state), steps })
    }
}
