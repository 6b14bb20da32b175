use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use swq_bus::MessageBus;
use swq_core::{AgentStatus, TaskId, TaskStatus};
use swq_queue::TaskQueue;
use swq_registry::AgentRegistry;
use swq_storage::Store;
use swq_storage_sqlite::SqliteStore;
use swq_worker::{CommandHandler, Config, Worker};

#[derive(Parser)]
#[command(name = "swq", version, about = "Shared work queue for agent fleets")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize a deployment here (creates .swq/, config, db)
    Init,

    /// Enqueue a task
    Submit {
        #[arg(long = "type")]
        task_type: String,
        /// JSON object payload
        #[arg(long)]
        payload: String,
        /// Advisory routing hint, not a lock
        #[arg(long)]
        agent: Option<String>,
        /// Higher is more urgent (default 5)
        #[arg(long)]
        priority: Option<i32>,
    },

    /// Claim the next eligible task for an agent
    Claim {
        #[arg(long)]
        agent: String,
    },

    /// Complete an in-progress task
    Complete {
        #[arg(long)]
        task: String,
        /// JSON object result
        #[arg(long)]
        result: String,
    },

    /// Report a failed attempt on an in-progress task
    Fail {
        #[arg(long)]
        task: String,
        #[arg(long)]
        error: String,
    },

    /// Show one task
    Show {
        #[arg(long)]
        task: String,
    },

    /// Show a task's audit history
    History {
        #[arg(long)]
        task: String,
    },

    /// List tasks, optionally filtered by status
    List {
        #[arg(long)]
        status: Option<String>,
    },

    /// Aggregate counts by status and agent
    Stats,

    /// Send a message (omit --to for broadcast)
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        topic: String,
        /// JSON object payload
        #[arg(long)]
        payload: String,
    },

    /// Drain unconsumed messages for an agent
    Recv {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        topic: Option<String>,
    },

    /// Register (or re-register) an agent
    Register {
        #[arg(long)]
        agent: String,
        #[arg(long = "type", default_value = "worker")]
        agent_type: String,
        /// JSON object
        #[arg(long, default_value = "{}")]
        capabilities: String,
    },

    /// Refresh an agent's liveness
    Heartbeat {
        #[arg(long)]
        agent: String,
    },

    /// Report healthy/stale for an agent
    Health {
        #[arg(long)]
        agent: String,
    },

    /// List registered agents
    Agents,

    /// Force an agent's status
    SetStatus {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        status: String,
        /// Required when status is busy
        #[arg(long)]
        task: Option<String>,
    },

    /// Mark agents with expired heartbeats offline (operator action)
    SweepOffline,

    /// Purge old terminal tasks and consumed messages
    Cleanup {
        /// Retention window in days (default from config)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Run a worker loop against the configured handler command
    Work {
        /// Agent id (default: agent-<pid>)
        #[arg(long)]
        agent: Option<String>,
        /// Poll once and exit instead of looping
        #[arg(long, default_value_t = false)]
        once: bool,
    },
}

fn load_config(root: &Path) -> Result<Config> {
    let cfg_path = Config::config_path(root);
    if cfg_path.exists() {
        Config::load_from(&cfg_path)
    } else {
        Ok(Config::default_config())
    }
}

fn open_store(root: &Path, cfg: &Config) -> Result<Arc<dyn Store>> {
    let store = SqliteStore::open(&cfg.db_path(root))?;
    Ok(Arc::new(store))
}

fn parse_document(label: &str, s: &str) -> Result<Value> {
    serde_json::from_str(s).with_context(|| format!("{label} must be valid JSON"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let root = std::env::current_dir()?;
    let cfg = load_config(&root)?;

    match cli.cmd {
        Command::Init => {
            let cfg_path = Config::config_path(&root);
            if !cfg_path.exists() {
                Config::default_config().save_to(&cfg_path)?;
            }
            let store = open_store(&root, &cfg)?;
            store.set_config("default_max_retries", &cfg.queue.default_max_retries.to_string())?;
            store.set_config("retention_days", &cfg.queue.retention_days.to_string())?;
            println!("Initialized swq in {}", root.display());
        }
        Command::Submit {
            task_type,
            payload,
            agent,
            priority,
        } => {
            let store = open_store(&root, &cfg)?;
            let queue = TaskQueue::new(store);
            let payload = parse_document("payload", &payload)?;
            let task = queue.submit(&task_type, payload, agent.as_deref(), priority)?;
            println!("{}", task.id);
        }
        Command::Claim { agent } => {
            let store = open_store(&root, &cfg)?;
            let queue = TaskQueue::new(store);
            match queue.claim_next(&agent)? {
                Some(task) => println!("{}", serde_json::to_string_pretty(&task)?),
                None => println!("no eligible task"),
            }
        }
        Command::Complete { task, result } => {
            let store = open_store(&root, &cfg)?;
            let queue = TaskQueue::new(store);
            let result = parse_document("result", &result)?;
            queue.complete(&TaskId::from_str(task.clone()), result)?;
            println!("completed {task}");
        }
        Command::Fail { task, error } => {
            let store = open_store(&root, &cfg)?;
            let queue = TaskQueue::new(store);
            let out = queue.fail(&TaskId::from_str(task.clone()), &error)?;
            if out.retrying {
                println!("requeued {task} (attempt {} recorded)", out.retries);
            } else {
                println!("failed {task} terminally after {} attempts", out.retries);
            }
        }
        Command::Show { task } => {
            let store = open_store(&root, &cfg)?;
            let queue = TaskQueue::new(store);
            let task = queue.get(&TaskId::from_str(task))?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        Command::History { task } => {
            let store = open_store(&root, &cfg)?;
            let queue = TaskQueue::new(store);
            for entry in queue.history(&TaskId::from_str(task))? {
                println!(
                    "{} {} by {} {}",
                    entry.ts_ms,
                    entry.action.as_str(),
                    if entry.agent_id.is_empty() { "-" } else { &entry.agent_id },
                    entry.details
                );
            }
        }
        Command::List { status } => {
            let store = open_store(&root, &cfg)?;
            let queue = TaskQueue::new(store);
            let filter = match status.as_deref() {
                None => None,
                Some(s) => Some(
                    TaskStatus::parse(s)
                        .with_context(|| format!("unknown status {s:?} (pending|in_progress|complete|failed)"))?,
                ),
            };
            for t in queue.list(filter)? {
                println!(
                    "- {} [{}] {} prio={} retries={}/{}",
                    t.id,
                    t.status.as_str(),
                    t.task_type,
                    t.priority,
                    t.retries,
                    t.max_retries
                );
            }
        }
        Command::Stats => {
            let store = open_store(&root, &cfg)?;
            let queue = TaskQueue::new(store);
            let stats = queue.stats()?;
            println!(
                "tasks: {} pending, {} in_progress, {} complete, {} failed",
                stats.pending, stats.in_progress, stats.complete, stats.failed
            );
            println!("unconsumed messages: {}", stats.unconsumed_messages);
            for a in stats.agents {
                println!(
                    "- {} [{}] completed={} failed={}",
                    a.agent_id,
                    a.status.as_str(),
                    a.total_completed,
                    a.total_failed
                );
            }
        }
        Command::Send {
            from,
            to,
            topic,
            payload,
        } => {
            let store = open_store(&root, &cfg)?;
            let bus = MessageBus::new(store);
            let payload = parse_document("payload", &payload)?;
            let id = bus.send(&from, to.as_deref(), &topic, payload)?;
            println!("{id}");
        }
        Command::Recv { agent, topic } => {
            let store = open_store(&root, &cfg)?;
            let bus = MessageBus::new(store);
            for m in bus.receive(&agent, topic.as_deref())? {
                println!(
                    "[{}] {} -> {}: {}",
                    m.topic,
                    m.from,
                    m.to.as_deref().unwrap_or("*"),
                    m.payload
                );
            }
        }
        Command::Register {
            agent,
            agent_type,
            capabilities,
        } => {
            let store = open_store(&root, &cfg)?;
            let registry = AgentRegistry::new(store);
            let capabilities = parse_document("capabilities", &capabilities)?;
            registry.register(&agent, &agent_type, capabilities, json!({}))?;
            println!("registered {agent}");
        }
        Command::Heartbeat { agent } => {
            let store = open_store(&root, &cfg)?;
            AgentRegistry::new(store).heartbeat(&agent)?;
            println!("ok");
        }
        Command::Health { agent } => {
            let store = open_store(&root, &cfg)?;
            let registry = AgentRegistry::new(store)
                .with_heartbeat_timeout_ms(cfg.worker.heartbeat_timeout_secs as i64 * 1000);
            println!("{:?}", registry.health(&agent)?);
        }
        Command::Agents => {
            let store = open_store(&root, &cfg)?;
            for a in AgentRegistry::new(store).list()? {
                println!(
                    "- {} [{}] type={} task={} completed={} failed={}",
                    a.id,
                    a.status.as_str(),
                    a.agent_type,
                    a.current_task.as_ref().map(|t| t.as_str()).unwrap_or("-"),
                    a.total_completed,
                    a.total_failed
                );
            }
        }
        Command::SetStatus {
            agent,
            status,
            task,
        } => {
            let store = open_store(&root, &cfg)?;
            let status = AgentStatus::parse(&status)
                .with_context(|| format!("unknown status {status:?} (idle|busy|offline)"))?;
            let task = task.map(TaskId::from_str);
            AgentRegistry::new(store).set_status(&agent, status, task.as_ref())?;
            println!("ok");
        }
        Command::SweepOffline => {
            let store = open_store(&root, &cfg)?;
            let registry = AgentRegistry::new(store)
                .with_heartbeat_timeout_ms(cfg.worker.heartbeat_timeout_secs as i64 * 1000);
            let flipped = registry.sweep_offline()?;
            println!("{flipped} agent(s) marked offline");
        }
        Command::Cleanup { days } => {
            let store = open_store(&root, &cfg)?;
            let days = days.unwrap_or(cfg.queue.retention_days);
            let report = TaskQueue::new(store).cleanup(days)?;
            println!(
                "removed {} task(s) and {} message(s) older than {} day(s)",
                report.tasks_removed, report.messages_removed, days
            );
        }
        Command::Work { agent, once } => {
            if cfg.handler.command.is_empty() {
                bail!("no [handler] command configured in {}", Config::config_path(&root).display());
            }
            let store = open_store(&root, &cfg)?;
            let agent_id = agent.unwrap_or_else(|| format!("agent-{}", std::process::id()));
            let worker = Worker::new(
                agent_id,
                cfg.worker.agent_type.clone(),
                store,
                Box::new(CommandHandler::new(cfg.handler.command.clone())),
                Duration::from_secs(cfg.worker.poll_interval_secs),
            );
            if once {
                if worker.run_once()? {
                    println!("processed one task");
                } else {
                    println!("no eligible task");
                }
            } else {
                worker.run()?;
            }
        }
    }

    Ok(())
}
