use std::io::Write;
use std::process::{Command, Stdio};

use serde_json::{json, Value};

use swq_core::Task;

/// What executing a work item produced. Failure here is an expected
/// business outcome subject to the retry policy, not a queue error.
#[derive(Clone, Debug)]
pub enum TaskOutcome {
    Success(Value),
    Failure(String),
}

/// Executes claimed tasks. The actual backend (a model invocation, a build,
/// anything) lives behind this seam; the queue core never sees it.
pub trait TaskHandler: Send + Sync {
    fn handle(&self, task: &Task) -> TaskOutcome;
}

impl<F> TaskHandler for F
where
    F: Fn(&Task) -> TaskOutcome + Send + Sync,
{
    fn handle(&self, task: &Task) -> TaskOutcome {
        self(task)
    }
}

/// Shells out to the configured command with the task payload as JSON on
/// stdin. Stdout is parsed as the result document; non-object output is
/// wrapped so the result still satisfies the store's payload contract.
pub struct CommandHandler {
    command: Vec<String>,
}

impl CommandHandler {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl TaskHandler for CommandHandler {
    fn handle(&self, task: &Task) -> TaskOutcome {
        let Some((program, args)) = self.command.split_first() else {
            return TaskOutcome::Failure("no handler command configured".to_string());
        };

        let mut child = match Command::new(program)
            .args(args)
            .env("SWQ_TASK_ID", task.id.as_str())
            .env("SWQ_TASK_TYPE", &task.task_type)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => return TaskOutcome::Failure(format!("spawn {program}: {e}")),
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(task.payload.to_string().as_bytes()) {
                return TaskOutcome::Failure(format!("write payload: {e}"));
            }
        }

        let out = match child.wait_with_output() {
            Ok(o) => o,
            Err(e) => return TaskOutcome::Failure(format!("wait {program}: {e}")),
        };

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let stderr = stderr.trim();
            return TaskOutcome::Failure(if stderr.is_empty() {
                format!("{program} exited with {}", out.status)
            } else {
                format!("{program}: {stderr}")
            });
        }

        let stdout = String::from_utf8_lossy(&out.stdout);
        let result = match serde_json::from_str::<Value>(stdout.trim()) {
            Ok(v) if v.is_object() => v,
            Ok(v) => json!({ "output": v }),
            Err(_) => json!({ "output": stdout.trim() }),
        };
        TaskOutcome::Success(result)
    }
}
