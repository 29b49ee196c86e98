use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::execution::{Job, SharedContext, job};
use crate::models::{DispatchError, DispatchErrorKind, DispatchResult};
use crate::orchestration::{CompletionSignal, TaskGroupCoordinator, TaskGroupHandle};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub usize);

struct GraphNode {
    name: String,
    job: Job,
    dependencies: Vec<OperationId>,
}

/// Named operations with "not before" dependencies between them.
#[derive(Default)]
pub struct OperationGraph {
    nodes: Vec<GraphNode>,
}

impl OperationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add(
        &mut self,
        name: impl Into<String>,
        operation: impl FnOnce() + Send + 'static,
    ) -> OperationId {
        let id = OperationId(self.nodes.len());
        self.nodes.push(GraphNode {
            name: name.into(),
            job: job(operation),
            dependencies: Vec::new(),
        });
        id
    }

    /// Declares that `operation` must not start before `dependency` finishes.
    pub fn add_dependency(
        &mut self,
        operation: OperationId,
        dependency: OperationId,
    ) -> DispatchResult<()> {
        for id in [operation, dependency] {
            if id.0 >= self.nodes.len() {
                return Err(DispatchError::new(
                    DispatchErrorKind::InvalidInput,
                    format!("unknown operation id '{}'", id.0),
                ));
            }
        }
        if operation == dependency {
            return Err(DispatchError::new(
                DispatchErrorKind::InvalidInput,
                format!(
                    "operation '{}' cannot depend on itself",
                    self.nodes[operation.0].name
                ),
            ));
        }

        let node = &mut self.nodes[operation.0];
        if !node.dependencies.contains(&dependency) {
            node.dependencies.push(dependency);
        }
        Ok(())
    }

    /// Schedules every operation on `context`, each one only after its
    /// dependencies have finished. The handle completes after the last one.
    pub fn submit(self, context: SharedContext) -> DispatchResult<TaskGroupHandle> {
        self.check_acyclic()?;

        let count = self.nodes.len();
        let mut dependents = vec![Vec::new(); count];
        let mut names = Vec::with_capacity(count);
        let mut jobs = Vec::with_capacity(count);
        let mut remaining = Vec::with_capacity(count);
        for (index, node) in self.nodes.into_iter().enumerate() {
            for dependency in &node.dependencies {
                dependents[dependency.0].push(index);
            }
            remaining.push(AtomicUsize::new(node.dependencies.len()));
            names.push(node.name);
            jobs.push(Mutex::new(Some(node.job)));
        }

        let (handle, signals) =
            TaskGroupCoordinator::open(count, job(|| {}), context.clone());
        let runtime = Arc::new(GraphRuntime {
            names,
            jobs,
            remaining,
            dependents,
            signals,
            context,
        });

        for index in 0..count {
            if runtime.remaining[index].load(Ordering::SeqCst) == 0 {
                start(&runtime, index);
            }
        }

        Ok(handle)
    }

    fn check_acyclic(&self) -> DispatchResult<()> {
        let mut indegree: Vec<usize> = self.nodes.iter().map(|n| n.dependencies.len()).collect();
        let mut dependents = vec![Vec::new(); self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            for dependency in &node.dependencies {
                dependents[dependency.0].push(index);
            }
        }

        let mut ready: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&index| indegree[index] == 0)
            .collect();
        let mut visited = 0;
        while let Some(index) = ready.pop_front() {
            visited += 1;
            for &dependent in &dependents[index] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.push_back(dependent);
                }
            }
        }

        if visited == self.nodes.len() {
            return Ok(());
        }

        let stuck = indegree
            .iter()
            .position(|&degree| degree > 0)
            .map(|index| self.nodes[index].name.as_str())
            .unwrap_or_default();
        Err(DispatchError::new(
            DispatchErrorKind::InvalidInput,
            format!("operation graph contains a cycle involving '{stuck}'"),
        ))
    }
}

struct GraphRuntime {
    names: Vec<String>,
    jobs: Vec<Mutex<Option<Job>>>,
    remaining: Vec<AtomicUsize>,
    dependents: Vec<Vec<usize>>,
    signals: Vec<CompletionSignal>,
    context: SharedContext,
}

fn start(runtime: &Arc<GraphRuntime>, index: usize) {
    let runtime_ref = runtime.clone();
    runtime.context.submit(job(move || {
        let release = ReleaseOnDrop {
            runtime: runtime_ref,
            index,
        };
        let runtime = &release.runtime;
        let operation = match runtime.jobs[index].lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => {
                tracing::error!(operation = %runtime.names[index], "operation slot mutex poisoned");
                None
            }
        };
        if let Some(operation) = operation {
            tracing::debug!(operation = %runtime.names[index], "running graph operation");
            operation();
        }
    }));
}

/// Releases dependents and records completion once an operation has finished,
/// whether it returned or unwound.
struct ReleaseOnDrop {
    runtime: Arc<GraphRuntime>,
    index: usize,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        let runtime = &self.runtime;
        let index = self.index;
        if std::thread::panicking() {
            tracing::error!(operation = %runtime.names[index], "graph operation panicked");
        }

        for &dependent in &runtime.dependents[index] {
            if runtime.remaining[dependent].fetch_sub(1, Ordering::SeqCst) == 1 {
                start(runtime, dependent);
            }
        }

        if let Err(error) = runtime.signals[index].complete() {
            tracing::error!(
                operation = %runtime.names[index],
                kind = ?error.kind,
                message = %error.message,
                "failed to record graph operation completion"
            );
        }
    }
}
