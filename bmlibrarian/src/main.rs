//! CLI entry point: queue administration, a worker-pool runner, and
//! one-shot invocations of the research and paper-checker flows.

use std::io::Read;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result, eyre};
use tracing::info;

use bmlibrarian::agents::{CitationFinderAgent, CounterfactualAgent, DocumentScoringAgent, QueryAgent, ReportingAgent, VerdictAgent};
use bmlibrarian::backend::InMemoryBackend;
use bmlibrarian::cli::{Cli, Command};
use bmlibrarian::config::Config;
use bmlibrarian::domain::Priority;
use bmlibrarian::llm::LlmGateway;
use bmlibrarian::orchestrator::{Orchestrator, SubmitRequest};
use bmlibrarian::pipeline::{PipelineController, ResearchParams};
use bmlibrarian::queue::TaskQueue;

fn setup_logging(level: &str) {
    let level = level.parse::<tracing::Level>().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

fn build_agents(gateway: Arc<LlmGateway>, config: &Config, backend: Arc<dyn bmlibrarian::backend::SearchBackend>) -> (QueryAgent, DocumentScoringAgent, CitationFinderAgent, ReportingAgent, CounterfactualAgent, VerdictAgent) {
    (
        QueryAgent::new(gateway.clone(), &config.agents.query_agent, backend),
        DocumentScoringAgent::new(gateway.clone(), &config.agents.scoring_agent),
        CitationFinderAgent::new(gateway.clone(), &config.agents.citation_agent),
        ReportingAgent::new(gateway.clone(), &config.agents.reporting_agent),
        CounterfactualAgent::new(gateway.clone(), &config.agents.counterfactual_agent),
        VerdictAgent::new(gateway, &config.agents.verdict_agent),
    )
}

/// This CLI ships without a wired-in production search backend (§6
/// leaves the relational store out of the core's scope); an empty
/// in-memory one lets every command run end-to-end against whatever
/// the caller's environment provides, documented at the top level.
fn empty_backend() -> Arc<dyn bmlibrarian::backend::SearchBackend> {
    Arc::new(InMemoryBackend::new(Vec::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    let gateway = Arc::new(LlmGateway::new(&config.llm).context("constructing LLM gateway")?);

    match cli.command {
        Command::Worker { max_workers } => {
            let mut orchestrator_config = config.orchestrator.clone();
            if let Some(n) = max_workers {
                orchestrator_config.max_workers = n;
            }

            let queue = Arc::new(TaskQueue::open(&config.queue.path).context("opening task queue")?);
            let orchestrator = Orchestrator::new(queue, orchestrator_config);

            let backend = empty_backend();
            let (query_agent, scoring_agent, citation_agent, reporting_agent, counterfactual_agent, verdict_agent) = build_agents(gateway, &config, backend);
            orchestrator.register_agent("query_agent", Arc::new(query_agent));
            orchestrator.register_agent("scoring_agent", Arc::new(scoring_agent));
            orchestrator.register_agent("citation_agent", Arc::new(citation_agent));
            orchestrator.register_agent("reporting_agent", Arc::new(reporting_agent));
            orchestrator.register_agent("counterfactual_agent", Arc::new(counterfactual_agent));
            orchestrator.register_agent("verdict_agent", Arc::new(verdict_agent));

            orchestrator.add_progress_callback(|event| info!(event_type = %event.event_type, message = %event.message, "progress"));

            info!(max_workers = config.orchestrator.max_workers, "starting worker pool");
            orchestrator.start();
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            info!("shutting down");
            orchestrator.stop().await;
            Ok(())
        }

        Command::Submit { target_agent, method, data, priority, max_attempts } => {
            let queue = Arc::new(TaskQueue::open(&config.queue.path).context("opening task queue")?);
            let orchestrator = Orchestrator::new(queue, config.orchestrator.clone());
            let payload: serde_json::Value = serde_json::from_str(&data).context("parsing task data as JSON")?;
            let request = SubmitRequest::new(target_agent, method, payload).with_priority(Priority::from(priority)).with_max_attempts(max_attempts);
            let id = orchestrator.submit(request.target_agent, request.method, request.data, request.priority, request.max_attempts)?;
            println!("{id}");
            Ok(())
        }

        Command::Status { task_id } => {
            let queue = TaskQueue::open(&config.queue.path).context("opening task queue")?;
            let task = queue.get(&task_id)?.ok_or_else(|| eyre!("no such task: {task_id}"))?;
            println!("{}", serde_json::to_string_pretty(&task)?);
            Ok(())
        }

        Command::Stats { agent } => {
            let queue = TaskQueue::open(&config.queue.path).context("opening task queue")?;
            let stats = queue.stats(agent.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }

        Command::Cleanup { older_than_hours } => {
            let queue = TaskQueue::open(&config.queue.path).context("opening task queue")?;
            let removed = queue.cleanup(std::time::Duration::from_secs(older_than_hours * 3600))?;
            println!("removed {removed} terminal task(s)");
            Ok(())
        }

        Command::Research { question, min_relevant } => {
            let backend = empty_backend();
            let (query_agent, scoring_agent, citation_agent, reporting_agent, counterfactual_agent, verdict_agent) = build_agents(gateway, &config, backend);
            let pipeline = PipelineController::new(query_agent, scoring_agent, citation_agent, reporting_agent, counterfactual_agent, verdict_agent);

            let params = ResearchParams { min_relevant, ..ResearchParams::default() };
            match pipeline.research(&question, params).await? {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => println!("insufficient evidence was found to synthesize a report"),
            }
            Ok(())
        }

        Command::CheckPaper { file, title } => {
            let text = match file {
                Some(path) => std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
                    buf
                }
            };

            let backend = empty_backend();
            let (query_agent, scoring_agent, citation_agent, reporting_agent, counterfactual_agent, verdict_agent) = build_agents(gateway, &config, backend);
            let pipeline = PipelineController::new(query_agent, scoring_agent, citation_agent, reporting_agent, counterfactual_agent, verdict_agent);

            let result = pipeline.check_paper(&text, title.as_deref(), ResearchParams::default()).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}
