//! Dependency planning
//!
//! Turns the registered pipelines and a [`RunRequest`] into an
//! [`ExecutionPlan`]: the candidate set for the run, grouped into waves where
//! every pipeline's dependencies sit in an earlier wave.

use super::core::ExecutionPolicy;
use super::executor::Pipeline;
use crate::error::{DocflowError, DocflowResult};
use crate::metadata::fold_key;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Which pipelines the caller asked for
///
/// An empty request runs every `Always` and `Default` pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    selected: Vec<String>,
    excluded: Vec<String>,
}

impl RunRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `name` even if its policy is `Manual`
    pub fn select(mut self, name: impl Into<String>) -> Self {
        self.selected.push(name.into());
        self
    }

    /// Leave `name` out unless it is `Always` or something depends on it
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.excluded.push(name.into());
        self
    }

    pub fn selected(&self) -> &[String] {
        &self.selected
    }

    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }
}

/// Ordered plan for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// Groups of pipelines that may run concurrently, in execution order
    pub waves: Vec<Vec<String>>,

    /// Pipelines that take part in the run, in declaration order
    pub candidates: Vec<String>,

    /// `(pipeline, dependency)` edges between candidates
    pub dependencies: Vec<(String, String)>,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        let folded = fold_key(name);
        self.candidates.iter().any(|c| fold_key(c) == folded)
    }

    /// Pipeline names in the order the waves run them
    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.waves.iter().flatten().map(String::as_str)
    }

    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        let folded = fold_key(name);
        self.dependencies
            .iter()
            .filter(|(pipeline, _)| fold_key(pipeline) == folded)
            .map(|(_, dependency)| dependency.as_str())
            .collect()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

/// Builds execution plans over a set of registered pipelines
pub struct DependencyScheduler<'a> {
    pipelines: &'a [Arc<Pipeline>],
    index: HashMap<String, usize>,
}

impl<'a> DependencyScheduler<'a> {
    /// `pipelines` must be in declaration order with unique names
    pub fn new(pipelines: &'a [Arc<Pipeline>]) -> Self {
        let index = pipelines
            .iter()
            .enumerate()
            .map(|(i, p)| (fold_key(p.name()), i))
            .collect();
        Self { pipelines, index }
    }

    /// Plan a run, failing before anything executes on a configuration error
    pub fn plan(&self, request: &RunRequest) -> DocflowResult<ExecutionPlan> {
        let selected = self.lookup_all(request.selected())?;
        let excluded = self.lookup_all(request.excluded())?;
        let edges = self.resolve_dependencies()?;

        let candidates = self.candidates(&selected, &excluded, &edges)?;
        self.detect_cycles(&candidates, &edges)?;
        let waves = self.layer(&candidates, &edges);

        let name = |i: usize| self.pipelines[i].name().to_string();
        let mut dependencies = Vec::new();
        for &i in &candidates {
            for &dep in &edges[i] {
                dependencies.push((name(i), name(dep)));
            }
        }

        tracing::debug!(
            candidates = candidates.len(),
            waves = waves.len(),
            "Planned pipeline execution"
        );

        Ok(ExecutionPlan {
            waves: waves
                .into_iter()
                .map(|wave| wave.into_iter().map(name).collect())
                .collect(),
            candidates: candidates.into_iter().map(name).collect(),
            dependencies,
        })
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        self.index.get(&fold_key(name)).copied()
    }

    fn lookup_all(&self, names: &[String]) -> DocflowResult<HashSet<usize>> {
        names
            .iter()
            .map(|name| {
                self.lookup(name)
                    .ok_or_else(|| DocflowError::UnknownPipeline(name.clone()))
            })
            .collect()
    }

    /// Dependency indices per pipeline, checked over every registered pipeline
    fn resolve_dependencies(&self) -> DocflowResult<Vec<Vec<usize>>> {
        self.pipelines
            .iter()
            .map(|pipeline| {
                pipeline
                    .dependencies()
                    .iter()
                    .map(|dep| {
                        self.lookup(dep).ok_or_else(|| DocflowError::UnknownDependency {
                            pipeline: pipeline.name().to_string(),
                            dependency: dep.clone(),
                        })
                    })
                    .collect()
            })
            .collect()
    }

    /// Candidate indices in declaration order
    fn candidates(
        &self,
        selected: &HashSet<usize>,
        excluded: &HashSet<usize>,
        edges: &[Vec<usize>],
    ) -> DocflowResult<Vec<usize>> {
        let mut included = vec![false; self.pipelines.len()];
        let mut stack = Vec::new();

        for (i, pipeline) in self.pipelines.iter().enumerate() {
            let root = match pipeline.policy() {
                ExecutionPolicy::Always => true,
                ExecutionPolicy::Default => selected.contains(&i) || !excluded.contains(&i),
                ExecutionPolicy::Manual => selected.contains(&i),
            };
            if root {
                included[i] = true;
                stack.push(i);
            }
        }

        while let Some(i) = stack.pop() {
            for &dep in &edges[i] {
                let dependency = &self.pipelines[dep];
                if dependency.policy() == ExecutionPolicy::Manual
                    && excluded.contains(&dep)
                    && !selected.contains(&dep)
                {
                    return Err(DocflowError::ExcludedDependency {
                        pipeline: self.pipelines[i].name().to_string(),
                        dependency: dependency.name().to_string(),
                    });
                }
                if !included[dep] {
                    included[dep] = true;
                    stack.push(dep);
                }
            }
        }

        Ok((0..self.pipelines.len()).filter(|&i| included[i]).collect())
    }

    fn detect_cycles(&self, candidates: &[usize], edges: &[Vec<usize>]) -> DocflowResult<()> {
        let mut colours = vec![Colour::White; self.pipelines.len()];
        let mut path = Vec::new();

        for &i in candidates {
            if colours[i] == Colour::White {
                self.visit(i, edges, &mut colours, &mut path)?;
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        node: usize,
        edges: &[Vec<usize>],
        colours: &mut [Colour],
        path: &mut Vec<usize>,
    ) -> DocflowResult<()> {
        colours[node] = Colour::Grey;
        path.push(node);

        for &dep in &edges[node] {
            match colours[dep] {
                Colour::White => self.visit(dep, edges, colours, path)?,
                Colour::Grey => {
                    let start = path.iter().position(|&p| p == dep).unwrap_or(0);
                    let pipelines = path[start..]
                        .iter()
                        .chain(std::iter::once(&dep))
                        .map(|&p| self.pipelines[p].name().to_string())
                        .collect();
                    return Err(DocflowError::CyclicDependency { pipelines });
                }
                Colour::Black => {}
            }
        }

        path.pop();
        colours[node] = Colour::Black;
        Ok(())
    }

    /// Kahn's algorithm, one wave per layer
    fn layer(&self, candidates: &[usize], edges: &[Vec<usize>]) -> Vec<Vec<usize>> {
        let mut in_degree: HashMap<usize, usize> = HashMap::new();
        let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
        for &i in candidates {
            in_degree.insert(i, edges[i].len());
            for &dep in &edges[i] {
                dependents.entry(dep).or_default().push(i);
            }
        }

        let mut wave: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|i| in_degree.get(i) == Some(&0))
            .collect();
        let mut waves = Vec::new();

        while !wave.is_empty() {
            let mut next = Vec::new();
            for i in &wave {
                for dependent in dependents.get(i).into_iter().flatten() {
                    if let Some(count) = in_degree.get_mut(dependent) {
                        *count = count.saturating_sub(1);
                        if *count == 0 {
                            next.push(*dependent);
                        }
                    }
                }
            }
            next.sort_unstable();
            waves.push(std::mem::replace(&mut wave, next));
        }

        waves
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(name: &str, deps: &[&str], policy: ExecutionPolicy) -> Arc<Pipeline> {
        let mut builder = Pipeline::builder(name).policy(policy);
        for dep in deps {
            builder = builder.depends_on(*dep);
        }
        Arc::new(builder.build())
    }

    fn plan(pipelines: &[Arc<Pipeline>], request: RunRequest) -> DocflowResult<ExecutionPlan> {
        DependencyScheduler::new(pipelines).plan(&request)
    }

    #[test]
    fn test_waves_follow_dependencies() {
        let pipelines = vec![
            pipeline("Feed", &["Posts", "Tags"], ExecutionPolicy::Default),
            pipeline("Tags", &["Posts"], ExecutionPolicy::Default),
            pipeline("Posts", &[], ExecutionPolicy::Default),
            pipeline("Assets", &[], ExecutionPolicy::Default),
        ];

        let plan = plan(&pipelines, RunRequest::new()).unwrap();
        assert_eq!(
            plan.waves,
            vec![
                vec!["Posts".to_string(), "Assets".to_string()],
                vec!["Tags".to_string()],
                vec!["Feed".to_string()],
            ]
        );
        assert_eq!(plan.candidates, vec!["Feed", "Tags", "Posts", "Assets"]);
        assert_eq!(plan.dependencies_of("feed"), vec!["Posts", "Tags"]);
        assert_eq!(
            plan.order().collect::<Vec<_>>(),
            vec!["Posts", "Assets", "Tags", "Feed"]
        );
    }

    #[test]
    fn test_cycle_names_members_in_path_order() {
        let pipelines = vec![
            pipeline("A", &["B"], ExecutionPolicy::Default),
            pipeline("B", &["C"], ExecutionPolicy::Default),
            pipeline("C", &["A"], ExecutionPolicy::Default),
        ];

        match plan(&pipelines, RunRequest::new()) {
            Err(DocflowError::CyclicDependency { pipelines }) => {
                assert_eq!(pipelines, vec!["A", "B", "C", "A"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let pipelines = vec![pipeline("Loop", &["loop"], ExecutionPolicy::Default)];
        let error = plan(&pipelines, RunRequest::new()).unwrap_err();
        assert!(error.is_configuration_error());
        assert!(error.to_string().contains("Loop -> Loop"));
    }

    #[test]
    fn test_cycle_outside_candidates_is_ignored() {
        let pipelines = vec![
            pipeline("A", &["B"], ExecutionPolicy::Manual),
            pipeline("B", &["A"], ExecutionPolicy::Manual),
            pipeline("Pages", &[], ExecutionPolicy::Default),
        ];
        let plan = plan(&pipelines, RunRequest::new()).unwrap();
        assert_eq!(plan.candidates, vec!["Pages"]);
    }

    #[test]
    fn test_unknown_names() {
        let pipelines = vec![pipeline("Pages", &[], ExecutionPolicy::Default)];

        assert!(matches!(
            plan(&pipelines, RunRequest::new().select("Missing")),
            Err(DocflowError::UnknownPipeline(name)) if name == "Missing"
        ));
        assert!(matches!(
            plan(&pipelines, RunRequest::new().exclude("Gone")),
            Err(DocflowError::UnknownPipeline(name)) if name == "Gone"
        ));

        let pipelines = vec![
            pipeline("Pages", &[], ExecutionPolicy::Default),
            pipeline("Drafts", &["Nowhere"], ExecutionPolicy::Manual),
        ];
        assert!(matches!(
            plan(&pipelines, RunRequest::new()),
            Err(DocflowError::UnknownDependency { pipeline, dependency })
                if pipeline == "Drafts" && dependency == "Nowhere"
        ));
    }

    #[test]
    fn test_policies() {
        let pipelines = vec![
            pipeline("Always", &[], ExecutionPolicy::Always),
            pipeline("Default", &[], ExecutionPolicy::Default),
            pipeline("Manual", &[], ExecutionPolicy::Manual),
        ];

        let plan_all = plan(&pipelines, RunRequest::new()).unwrap();
        assert_eq!(plan_all.candidates, vec!["Always", "Default"]);

        let excluded = plan(
            &pipelines,
            RunRequest::new().exclude("Always").exclude("Default"),
        )
        .unwrap();
        assert_eq!(excluded.candidates, vec!["Always"]);

        let selected = plan(&pipelines, RunRequest::new().select("manual")).unwrap();
        assert_eq!(selected.candidates, vec!["Always", "Default", "Manual"]);
    }

    #[test]
    fn test_dependencies_pull_in_pipelines() {
        let pipelines = vec![
            pipeline("Base", &[], ExecutionPolicy::Manual),
            pipeline("Shared", &[], ExecutionPolicy::Default),
            pipeline("Derived", &["Base", "Shared"], ExecutionPolicy::Default),
        ];

        let plan = plan(&pipelines, RunRequest::new().exclude("Shared")).unwrap();
        assert_eq!(plan.candidates, vec!["Base", "Shared", "Derived"]);
        assert_eq!(plan.waves.len(), 2);
    }

    #[test]
    fn test_excluded_manual_dependency() {
        let pipelines = vec![
            pipeline("Base", &[], ExecutionPolicy::Manual),
            pipeline("Derived", &["Base"], ExecutionPolicy::Default),
        ];

        match plan(&pipelines, RunRequest::new().exclude("Base")) {
            Err(DocflowError::ExcludedDependency {
                pipeline,
                dependency,
            }) => {
                assert_eq!(pipeline, "Derived");
                assert_eq!(dependency, "Base");
            }
            other => panic!("expected excluded dependency, got {:?}", other),
        }
    }

    #[test]
    fn test_plans_are_deterministic() {
        let pipelines = vec![
            pipeline("D", &["B", "C"], ExecutionPolicy::Default),
            pipeline("C", &["A"], ExecutionPolicy::Default),
            pipeline("B", &["A"], ExecutionPolicy::Default),
            pipeline("A", &[], ExecutionPolicy::Default),
        ];

        let first = plan(&pipelines, RunRequest::new()).unwrap();
        for _ in 0..10 {
            assert_eq!(plan(&pipelines, RunRequest::new()).unwrap(), first);
        }
        assert_eq!(first.waves[1], vec!["C".to_string(), "B".to_string()]);
    }
}
