use crate::types::Task;
use std::collections::HashMap;

/// Dependency graph over the tasks of one plan.
///
/// Built once at plan creation; construction collects every structural problem
/// (duplicate ids, dangling dependencies, cycles) instead of stopping at the first.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    ids: Vec<String>,
    dependencies: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
}

impl TaskGraph {
    pub fn build(tasks: &[Task]) -> Result<Self, Vec<String>> {
        let mut problems = Vec::new();
        let mut ids: Vec<String> = Vec::with_capacity(tasks.len());
        for task in tasks {
            if ids.contains(&task.id) {
                problems.push(format!("duplicate task id '{}'", task.id));
            } else {
                ids.push(task.id.clone());
            }
        }

        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> =
            ids.iter().map(|id| (id.clone(), Vec::new())).collect();
        for task in tasks {
            let mut deps: Vec<String> = Vec::new();
            for dep in &task.dependencies {
                if !ids.contains(dep) {
                    problems.push(format!(
                        "task '{}' depends on unknown task '{dep}'",
                        task.id
                    ));
                } else if !deps.contains(dep) {
                    deps.push(dep.clone());
                    if let Some(list) = dependents.get_mut(dep) {
                        list.push(task.id.clone());
                    }
                }
            }
            dependencies.entry(task.id.clone()).or_insert(deps);
        }

        let graph = Self {
            ids,
            dependencies,
            dependents,
        };

        if let Some(cycle) = graph.find_cycle() {
            problems.push(format!("dependency cycle: {}", cycle.join(" -> ")));
        }

        if problems.is_empty() {
            Ok(graph)
        } else {
            Err(problems)
        }
    }

    pub fn dependencies(&self, id: &str) -> &[String] {
        self.dependencies.get(id).map_or(&[], Vec::as_slice)
    }

    pub fn dependents(&self, id: &str) -> &[String] {
        self.dependents.get(id).map_or(&[], Vec::as_slice)
    }

    /// Tasks nothing else depends on, in submission order.
    pub fn sinks(&self) -> Vec<&str> {
        self.ids
            .iter()
            .filter(|id| self.dependents(id).is_empty())
            .map(String::as_str)
            .collect()
    }

    /// Returns one cycle as a path of ids (first id repeated at the end).
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited: HashMap<&str, u8> = HashMap::new();
        let mut stack: Vec<&str> = Vec::new();
        for id in &self.ids {
            if let Some(cycle) = self.dfs_cycle(id, &mut visited, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        id: &'a str,
        visited: &mut HashMap<&'a str, u8>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match visited.get(id) {
            Some(1) => {
                // back edge
                let start = stack.iter().position(|s| *s == id).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(id.to_string());
                return Some(cycle);
            }
            Some(2) => return None,
            _ => {}
        }
        visited.insert(id, 1);
        stack.push(id);
        for dep in self.dependencies(id) {
            if let Some(cycle) = self.dfs_cycle(dep, visited, stack) {
                return Some(cycle);
            }
        }
        stack.pop();
        visited.insert(id, 2);
        None
    }
}
