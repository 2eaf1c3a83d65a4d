//! Parent/child view of a playground's tasks.

use std::collections::HashMap;

use phantom_core::Task;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct TaskGraph {
    tasks: HashMap<Uuid, Task>,
    children: HashMap<Uuid, Vec<Uuid>>,
    roots: Vec<Uuid>,
}

/// Index tasks by id and parent. Input order is kept for roots and children.
///
/// A task whose parent is not among `tasks` is promoted to a root so it still
/// runs and is accounted for.
pub fn build_task_graph(tasks: Vec<Task>) -> TaskGraph {
    let mut graph = TaskGraph::default();
    for task in &tasks {
        graph.tasks.insert(task.id, task.clone());
    }

    for task in tasks {
        match task.parent_id {
            Some(parent) if graph.tasks.contains_key(&parent) => {
                graph.children.entry(parent).or_default().push(task.id);
            }
            Some(parent) => {
                warn!(task_id = %task.id, parent_id = %parent, "Parent task missing, treating as root");
                graph.roots.push(task.id);
            }
            None => graph.roots.push(task.id),
        }
    }
    graph
}

impl TaskGraph {
    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn children(&self, id: Uuid) -> &[Uuid] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn roots(&self) -> &[Uuid] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// All transitive descendants of `id`, breadth first, without `id` itself.
    pub fn descendants(&self, id: Uuid) -> Vec<Uuid> {
        let mut out = Vec::new();
        let mut frontier: Vec<Uuid> = self.children(id).to_vec();
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for child in frontier {
                next.extend_from_slice(self.children(child));
                out.push(child);
            }
            frontier = next;
        }
        out
    }
}
