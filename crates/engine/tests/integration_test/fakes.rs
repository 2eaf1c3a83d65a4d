//! Scripted executors and a wired runner over the in-memory store.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use phantom_core::{Playground, StepResult, Task, TaskExecutor, TaskKind};
use phantom_engine::*;
use uuid::Uuid;

#[derive(Default)]
struct Script {
    failing: HashSet<String>,
    hanging: HashSet<String>,
    panicking: HashSet<String>,
    delay: Duration,
    events: Vec<String>,
}

/// Executor whose outcome per task name is scripted; records start/end events.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    script: Arc<Mutex<Script>>,
}

impl ScriptedExecutor {
    pub fn fails(self, name: &str) -> Self {
        self.script.lock().unwrap().failing.insert(name.into());
        self
    }

    pub fn hangs(self, name: &str) -> Self {
        self.script.lock().unwrap().hanging.insert(name.into());
        self
    }

    pub fn panics(self, name: &str) -> Self {
        self.script.lock().unwrap().panicking.insert(name.into());
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.script.lock().unwrap().delay = delay;
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.script.lock().unwrap().events.clone()
    }

    /// Names of the tasks this executor started, in order.
    pub fn started(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| e.strip_prefix("start:").map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, task: &Task) -> StepResult {
        let (delay, hang, fail, panic) = {
            let mut s = self.script.lock().unwrap();
            s.events.push(format!("start:{}", task.name));
            (
                s.delay,
                s.hanging.contains(&task.name),
                s.failing.contains(&task.name),
                s.panicking.contains(&task.name),
            )
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if hang {
            std::future::pending::<()>().await;
        }
        if panic {
            panic!("executor blew up on {}", task.name);
        }
        self.script
            .lock()
            .unwrap()
            .events
            .push(format!("end:{}", task.name));
        if fail {
            StepResult::failed(task.id, Some("s-1".into()), "Table not found")
                .with_log(Some(format!("s3://bucket/logs/{}.log", task.name)))
        } else {
            StepResult::completed(task.id, "s-1", "Step completed successfully")
                .with_output(Some(format!("s3://bucket/out/{}.txt", task.name)))
        }
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub cluster: ScriptedExecutor,
    pub sql: ScriptedExecutor,
    pub runner: Arc<PlaygroundRunner>,
}

pub fn harness(cluster: ScriptedExecutor) -> Harness {
    harness_with(cluster, ScriptedExecutor::default())
}

pub fn harness_with(cluster: ScriptedExecutor, sql: ScriptedExecutor) -> Harness {
    let store = MemoryStore::new();
    let runner = Arc::new(PlaygroundRunner::new(
        Arc::new(store.clone()),
        Arc::new(cluster.clone()),
        Arc::new(sql.clone()),
        Arc::new(NoReconciliation),
        CancellationRegistry::new(),
        Duration::from_secs(1),
    ));
    Harness {
        store,
        cluster,
        sql,
        runner,
    }
}

impl Harness {
    pub fn playground(&self, cron: Option<&str>) -> Playground {
        let pg = Playground::new("playground", cron.map(str::to_string));
        self.store.insert_playground(pg.clone());
        pg
    }

    pub fn task(&self, pg: &Playground, name: &str, parent: Option<Uuid>) -> Uuid {
        self.task_of_kind(pg, name, parent, TaskKind::Hive)
    }

    pub fn task_of_kind(&self, pg: &Playground, name: &str, parent: Option<Uuid>, kind: TaskKind) -> Uuid {
        let mut task = Task::new(pg.id, name, kind, format!("select '{}'", name));
        task.parent_id = parent;
        let id = task.id;
        self.store.insert_task(task);
        id
    }

    pub fn status_of(&self, task_id: Uuid) -> Option<phantom_core::Status> {
        self.store.task(task_id).and_then(|t| t.last_run_status)
    }
}
