use crate::errors::ChronarchErrors;
use crate::job::Job;
use std::collections::{BTreeSet, HashMap};

#[allow(unused_imports)]
use crate::scheduler::Scheduler;

/// [`JobGraph`] is the directed acyclic graph of job vertices with ``is-parent-of`` edges,
/// keyed by job name over a sparse adjacency map. It is pure state, it emits no events and
/// performs no I/O, the [`Scheduler`] serializes every mutation behind its own monitor.
///
/// # Implementation Detail(s)
/// Besides the adjacency, the graph maintains a per-vertex *dependency invocation set*:
/// the set of parents that have completed since the vertex last fired. A dependency-based
/// vertex becomes executable when this set covers its ``parents``;
/// [`JobGraph::get_executable_children`] is the sole reader of the invocation sets and
/// drains the entries it returns.
///
/// # See Also
/// - [`Job`]
/// - [`Scheduler`]
#[derive(Debug, Default)]
pub struct JobGraph {
    vertices: HashMap<String, Job>,
    children: HashMap<String, BTreeSet<String>>,
    invocations: HashMap<String, BTreeSet<String>>,
}

impl JobGraph {
    /// Creates / Constructs a new, empty [`JobGraph`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a vertex for the supplied job, replacing any vertex already
    /// registered under the same name (edges of a replaced vertex survive)
    pub fn add_vertex(&mut self, job: Job) {
        self.vertices.insert(job.name().to_owned(), job);
    }

    /// Replaces the vertex of ``old`` with ``new``, both must carry the same name,
    /// edges and pending invocation entries are preserved
    pub fn replace_vertex(&mut self, old: &Job, new: Job) -> Result<(), ChronarchErrors> {
        if old.name() != new.name() {
            return Err(ChronarchErrors::JobRenameUnsupported(
                old.name().to_owned(),
                new.name().to_owned(),
            ));
        }
        if !self.vertices.contains_key(old.name()) {
            return Err(ChronarchErrors::VertexMissing(old.name().to_owned()));
        }
        self.vertices.insert(new.name().to_owned(), new);
        Ok(())
    }

    /// Removes the vertex of the supplied name along with every edge touching it
    /// and its pending invocation entries
    pub fn remove_vertex(&mut self, name: &str) {
        self.vertices.remove(name);
        self.children.remove(name);
        self.invocations.remove(name);
        for children in self.children.values_mut() {
            children.remove(name);
        }
        for invoked in self.invocations.values_mut() {
            invoked.remove(name);
        }
    }

    /// Looks up the vertex registered under the supplied name
    pub fn lookup_vertex(&self, name: &str) -> Option<&Job> {
        self.vertices.get(name)
    }

    /// Gets the names of the children the supplied vertex is a parent of
    pub fn get_children(&self, name: &str) -> Vec<String> {
        self.children
            .get(name)
            .map(|children| children.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Resolves the parent vertices of a dependency-based job
    ///
    /// # Returns
    /// The parent jobs, or [`ChronarchErrors::UnresolvedParent`] when a named
    /// parent has no vertex in the graph
    pub fn parent_jobs(&self, job: &Job) -> Result<Vec<Job>, ChronarchErrors> {
        let Some(dep) = job.as_dependency_based() else {
            return Ok(Vec::new());
        };
        dep.parents
            .iter()
            .map(|parent| {
                self.vertices.get(parent).cloned().ok_or_else(|| {
                    ChronarchErrors::UnresolvedParent(job.name().to_owned(), parent.clone())
                })
            })
            .collect()
    }

    /// Records an ``is-parent-of`` edge from ``parent`` to ``child``
    ///
    /// # Returns
    /// [`ChronarchErrors::UnresolvedParent`] when the parent has no vertex, or
    /// [`ChronarchErrors::CyclicDependency`] when the parent is reachable from the
    /// child (the graph stays acyclic by construction)
    pub fn add_dependency(&mut self, parent: &str, child: &str) -> Result<(), ChronarchErrors> {
        if !self.vertices.contains_key(parent) {
            return Err(ChronarchErrors::UnresolvedParent(
                child.to_owned(),
                parent.to_owned(),
            ));
        }
        if parent == child || self.reachable(child, parent) {
            return Err(ChronarchErrors::CyclicDependency(
                parent.to_owned(),
                child.to_owned(),
            ));
        }
        self.children
            .entry(parent.to_owned())
            .or_default()
            .insert(child.to_owned());
        Ok(())
    }

    /// Marks ``completed`` as done for each of its children and drains the children
    /// whose every parent has now reported completion in the current round
    ///
    /// # Returns
    /// The names of the children ready to fire; their invocation sets are removed
    /// as part of the call
    pub fn get_executable_children(&mut self, completed: &str) -> Vec<String> {
        let Some(children) = self.children.get(completed).cloned() else {
            return Vec::new();
        };

        let mut executable = Vec::new();
        for child in children {
            let Some(job) = self.vertices.get(&child) else {
                continue;
            };
            let Some(dep) = job.as_dependency_based() else {
                continue;
            };
            let parents = dep.parents.clone();

            let invoked = self.invocations.entry(child.clone()).or_default();
            invoked.insert(completed.to_owned());
            if parents.iter().all(|parent| invoked.contains(parent)) {
                self.invocations.remove(&child);
                executable.push(child);
            }
        }
        executable
    }

    /// Clears the dependency invocation set of the supplied vertex, performed when
    /// a fresh task of the vertex starts running
    pub fn reset_dependency_invocations(&mut self, name: &str) {
        self.invocations.remove(name);
    }

    /// Gets the number of vertices currently registered
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Gets the names of every registered vertex
    pub fn vertex_names(&self) -> Vec<String> {
        self.vertices.keys().cloned().collect()
    }

    /// Clears every vertex, edge and invocation entry
    pub fn reset(&mut self) {
        self.vertices.clear();
        self.children.clear();
        self.invocations.clear();
    }

    fn reachable(&self, from: &str, target: &str) -> bool {
        let mut stack = vec![from.to_owned()];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(children) = self.children.get(&current) {
                stack.extend(children.iter().cloned());
            }
        }
        false
    }
}
