use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use rand::Rng;
use serde::Serialize;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use orch_lite::config::{OrchestratorConfig, RankingConfig, RetryConfig, RetryMode};
use orch_lite::models::{
    EvalTrigger, Evaluation, Execution, ExecutionDesiredStateType, ExecutionState,
    ExecutionStateType, Job, JobHistory, JobType, NodeInfo, ReschedulingPolicy,
};
use orch_lite::orchestrator::Orchestrator;
use orch_lite::selection::NodeInventory;
use orch_lite::shutdown::install_shutdown_handler;
use orch_lite::store::{
    EventType, ExecutionChanges, GetExecutionsOptions, InMemoryJobStore, JobStore,
    UpdateExecutionCondition, UpdateExecutionRequest, WatchStream, WatcherType,
};
use orch_lite::worker::EvaluationBroker;

#[derive(Parser, Debug)]
#[command(name = "orch-lite")]
#[command(version)]
#[command(about = "Evaluation-driven job scheduling core")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run one job against simulated nodes and report the outcome
    Simulate(SimulateArgs),
}

#[derive(Parser, Debug)]
struct SimulateArgs {
    /// Number of simulated nodes
    #[arg(long, default_value = "5")]
    nodes: usize,

    /// Maximum concurrent executions per node (0 for unbounded)
    #[arg(long, default_value = "0")]
    node_capacity: u32,

    /// Desired number of executions
    #[arg(long, default_value = "3")]
    count: usize,

    #[arg(long, default_value = "batch")]
    job_type: JobTypeArg,

    /// Probability that a node turns down a bid request
    #[arg(long, default_value = "0.0")]
    reject_rate: f64,

    /// Probability that an accepted execution fails instead of completing
    #[arg(long, default_value = "0.0")]
    fail_rate: f64,

    /// Retry budget: deadline, always or never
    #[arg(long, default_value = "deadline")]
    retry: RetryMode,

    /// Job scheduling timeout in seconds (0 uses the default)
    #[arg(long, default_value = "0")]
    scheduling_timeout: u64,

    /// Base delay in seconds before re-placing after bid rejections
    #[arg(long, default_value = "1")]
    base_retry_delay: u64,

    /// Upper bound of random rank noise (0 disables it)
    #[arg(long, default_value = "0")]
    random_spread: i32,

    /// Give up after this many seconds
    #[arg(long, default_value = "10")]
    timeout_secs: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum JobTypeArg {
    Batch,
    Service,
    Ops,
}

impl From<JobTypeArg> for JobType {
    fn from(arg: JobTypeArg) -> Self {
        match arg {
            JobTypeArg::Batch => JobType::Batch,
            JobTypeArg::Service => JobType::Service,
            JobTypeArg::Ops => JobType::Ops,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct SimulationOutput {
    job: Job,
    executions: Vec<Execution>,
    history: Vec<JobHistory>,
}

/// Plays the node side of the bidding exchange: answers bid requests,
/// starts approved executions and finishes them.
struct SimulatedNodes {
    store: Arc<InMemoryJobStore>,
    inventory: Arc<NodeInventory>,
    broker: EvaluationBroker,
    reject_rate: f64,
    fail_rate: f64,
}

impl SimulatedNodes {
    async fn run(self, mut events: WatchStream, shutdown: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = events.next() => match next {
                    Some(event) => event,
                    None => break,
                },
            };
            let execution: Execution = match event.decode() {
                Ok(execution) => execution,
                Err(e) => {
                    tracing::warn!(error = %e, "Undecodable execution event");
                    continue;
                }
            };
            if let Err(e) = self.react(execution).await {
                tracing::debug!(error = %e, "Simulated node action skipped");
            }
        }
    }

    async fn react(&self, execution: Execution) -> orch_lite::Result<()> {
        let desired = execution.desired_state.state_type;
        match execution.compute_state.state_type {
            ExecutionStateType::New if desired == ExecutionDesiredStateType::Pending => {
                let rejected = rand::thread_rng().gen_bool(self.reject_rate.clamp(0.0, 1.0));
                let next = if rejected {
                    self.inventory.record_bid_rejection(&execution.node_id).await;
                    ExecutionState::new(ExecutionStateType::AskForBidRejected)
                        .with_message(format!("node {} has no room", execution.node_id))
                } else {
                    ExecutionState::new(ExecutionStateType::AskForBidAccepted)
                };
                self.transition(&execution, next).await
            }
            ExecutionStateType::AskForBidAccepted if desired == ExecutionDesiredStateType::Running => {
                self.transition(
                    &execution,
                    ExecutionState::new(ExecutionStateType::BidAccepted),
                )
                .await?;
                let job = self.store.get_job(&execution.job_id).await?;
                if job.job_type == JobType::Service {
                    return Ok(());
                }
                let execution = self
                    .store
                    .get_executions(GetExecutionsOptions::for_job(&job.id))
                    .await?
                    .into_iter()
                    .find(|e| e.id == execution.id)
                    .ok_or_else(|| orch_lite::OrchError::ExecutionNotFound(execution.id.clone()))?;
                let failed = rand::thread_rng().gen_bool(self.fail_rate.clamp(0.0, 1.0));
                let next = if failed {
                    ExecutionState::new(ExecutionStateType::Failed)
                        .with_message(format!("simulated failure on node {}", execution.node_id))
                } else {
                    ExecutionState::new(ExecutionStateType::Completed)
                };
                self.transition(&execution, next).await
            }
            _ => Ok(()),
        }
    }

    async fn transition(&self, execution: &Execution, next: ExecutionState) -> orch_lite::Result<()> {
        let comment = format!("node {} reported {}", execution.node_id, next.state_type);
        self.store
            .update_execution(UpdateExecutionRequest {
                execution_id: execution.id.clone(),
                condition: UpdateExecutionCondition {
                    expected_revision: execution.revision,
                    ..Default::default()
                },
                changes: ExecutionChanges {
                    compute_state: Some(next),
                    ..Default::default()
                },
                comment,
            })
            .await?;
        let job = self.store.get_job(&execution.job_id).await?;
        self.broker
            .enqueue(Evaluation::new(&job, EvalTrigger::ExecutionUpdate))
    }
}

async fn run_simulation(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = OrchestratorConfig::default()
        .with_retry(RetryConfig {
            mode: args.retry,
            ..RetryConfig::default()
        })
        .with_ranking(RankingConfig {
            random_spread: args.random_spread,
            ..RankingConfig::default()
        });

    let (orchestrator, eval_rx) = Orchestrator::new(config);
    for i in 0..args.nodes {
        orchestrator
            .register_node(NodeInfo::new(format!("node-{i}")).with_capacity(args.node_capacity, 0))
            .await;
    }
    tracing::info!(nodes = orchestrator.inventory.len().await, "Simulated nodes registered");

    let shutdown = install_shutdown_handler();
    let agent = SimulatedNodes {
        store: orchestrator.store.clone(),
        inventory: orchestrator.inventory.clone(),
        broker: orchestrator.broker(),
        reject_rate: args.reject_rate,
        fail_rate: args.fail_rate,
    };
    let events = orchestrator
        .store
        .watch(WatcherType::EXECUTION, EventType::CREATE | EventType::UPDATE)
        .await;
    let agent_handle = tokio::spawn(agent.run(events, shutdown.clone()));
    let worker_handle = orchestrator.spawn_worker(eval_rx, shutdown.clone());

    let job = Job::new("simulated", args.job_type.into(), args.count).with_rescheduling_policy(
        ReschedulingPolicy {
            scheduling_timeout_secs: args.scheduling_timeout,
            base_retry_delay_secs: args.base_retry_delay,
            ..ReschedulingPolicy::default()
        },
    );
    let job_id = orchestrator.submit_job(job).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.timeout_secs);
    let mut poll = tokio::time::interval(Duration::from_millis(50));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(job_id = %job_id, "Simulation timed out before the job settled");
                break;
            }
            _ = poll.tick() => {
                let job = orchestrator.store.get_job(&job_id).await?;
                if job.is_terminal() {
                    break;
                }
            }
        }
    }
    shutdown.cancel();
    let (agent_result, worker_result) = tokio::join!(agent_handle, worker_handle);
    if let Err(e) = agent_result {
        tracing::error!(error = %e, "Simulated node agent task failed");
    }
    if let Err(e) = worker_result {
        tracing::error!(error = %e, "Evaluation worker task failed");
    }

    let output = SimulationOutput {
        job: orchestrator.store.get_job(&job_id).await?,
        executions: orchestrator
            .store
            .get_executions(GetExecutionsOptions::for_job(&job_id))
            .await?,
        history: orchestrator.store.get_job_history(&job_id).await?,
    };

    match args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job ID:   {}", output.job.id);
            println!("Type:     {}", output.job.job_type);
            println!("State:    {}", output.job.state.state_type);
            if !output.job.state.message.is_empty() {
                println!("Message:  {}", output.job.state.message);
            }
            println!();
            println!("{:<42} {:<10} {:<22} DESIRED", "EXECUTION", "NODE", "STATE");
            println!("{}", "-".repeat(84));
            for exec in &output.executions {
                println!(
                    "{:<42} {:<10} {:<22} {}",
                    exec.id,
                    exec.node_id,
                    exec.compute_state.state_type.to_string(),
                    exec.desired_state.state_type
                );
            }
            println!();
            println!("History: {} entries", output.history.len());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Simulate(args) => run_simulation(args).await,
    }
}
