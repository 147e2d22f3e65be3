//! Fragment tree resolution.
//!
//! The fragment tree is discovered from the template inclusion structure:
//! starting at the main template, each template is read once and its
//! inclusion directives (reported by the template backend) become child
//! fragments. The resulting tree drives execution order, context merging
//! and closure computation for partial generation.
//!
//! Cycles in the inclusion graph are a fatal configuration error and are
//! reported with the full chain; a template included from two different
//! parents would make fragment paths ambiguous and is rejected as well.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::backend::TemplateBackend;
use crate::core::error::DocforgeError;
use crate::spec::DocSpec;

/// One content unit of the document: a template plus an optional source
/// unit, addressed by its dot-separated path within the tree.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Fragment name: template file basename without extension
    pub name: String,
    /// Template file name, as referenced by inclusion directives
    pub template: String,
    /// Dot-separated ancestry path, e.g. `root.section.detail`
    pub path: String,
    /// Path of the parent fragment; `None` for the root
    pub parent: Option<String>,
    /// Paths of child fragments, in inclusion order
    pub children: Vec<String>,
    /// Source unit feeding this fragment, if one exists
    pub source: Option<PathBuf>,
}

/// The resolved fragment tree of one document specification.
#[derive(Debug, Clone)]
pub struct FragmentTree {
    fragments: HashMap<String, Fragment>,
    by_name: HashMap<String, String>,
    order: Vec<String>,
    root: String,
}

/// Color states for the inclusion-cycle DFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl FragmentTree {
    /// Build the fragment tree for a specification.
    ///
    /// Reads every reachable template exactly once, asks `backend` for its
    /// inclusions, verifies the inclusion graph is a tree (acyclic, single
    /// parent) and attaches each fragment's source unit.
    pub fn build(spec: &DocSpec, backend: &dyn TemplateBackend) -> Result<Self, DocforgeError> {
        let root_template = spec.config.main_template.clone();

        // First pass: read templates and record inclusion edges.
        let mut includes: HashMap<String, Vec<String>> = HashMap::new();
        let mut worklist = vec![root_template.clone()];
        while let Some(template) = worklist.pop() {
            if includes.contains_key(&template) {
                continue;
            }
            let path = spec.template_path(&template);
            let content = std::fs::read_to_string(&path).map_err(|_| {
                DocforgeError::config(format!(
                    "Template '{}' does not exist in {}",
                    template,
                    spec.templates_dir().display()
                ))
            })?;
            let children = backend.included_templates(&content);
            debug!("Template '{}' includes {:?}", template, children);
            for child in &children {
                worklist.push(child.clone());
            }
            includes.insert(template, children);
        }

        Self::detect_cycles(&root_template, &includes)?;
        Self::reject_shared_inclusions(&includes)?;

        // Second pass: assign tree paths in pre-order. The graph is known
        // to be a tree at this point, so plain recursion terminates.
        let mut tree = Self {
            fragments: HashMap::new(),
            by_name: HashMap::new(),
            order: Vec::new(),
            root: String::new(),
        };
        tree.insert_subtree(spec, &includes, &root_template, None)?;
        tree.root = tree.order[0].clone();
        Ok(tree)
    }

    fn insert_subtree(
        &mut self,
        spec: &DocSpec,
        includes: &HashMap<String, Vec<String>>,
        template: &str,
        parent_path: Option<&str>,
    ) -> Result<(), DocforgeError> {
        let name = template_basename(template);
        let path = match parent_path {
            Some(parent) => format!("{parent}.{name}"),
            None => name.clone(),
        };

        if let Some(previous) = self.by_name.insert(name.clone(), path.clone()) {
            return Err(DocforgeError::config(format!(
                "Fragment name '{name}' is ambiguous: used at '{previous}' and '{path}'"
            )));
        }

        let children_templates = includes.get(template).cloned().unwrap_or_default();
        let source = spec.source_unit_for(&name)?;

        self.order.push(path.clone());
        self.fragments.insert(
            path.clone(),
            Fragment {
                name,
                template: template.to_string(),
                path: path.clone(),
                parent: parent_path.map(str::to_string),
                children: Vec::new(),
                source,
            },
        );

        let mut child_paths = Vec::with_capacity(children_templates.len());
        for child in &children_templates {
            self.insert_subtree(spec, includes, child, Some(&path))?;
            child_paths.push(format!("{path}.{}", template_basename(child)));
        }
        if let Some(fragment) = self.fragments.get_mut(&path) {
            fragment.children = child_paths;
        }
        Ok(())
    }

    /// Detect inclusion cycles with a colored depth-first search.
    ///
    /// Reports the full chain (`a.tex → b.tex → a.tex`) so the offending
    /// include is obvious.
    fn detect_cycles(
        root: &str,
        includes: &HashMap<String, Vec<String>>,
    ) -> Result<(), DocforgeError> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

        for (template, children) in includes {
            let from = *nodes
                .entry(template.as_str())
                .or_insert_with(|| graph.add_node(template.clone()));
            for child in children {
                let to = *nodes
                    .entry(child.as_str())
                    .or_insert_with(|| graph.add_node(child.clone()));
                graph.add_edge(from, to, ());
            }
        }

        let Some(&start) = nodes.get(root) else {
            return Ok(());
        };

        let mut colors: HashMap<NodeIndex, Color> = graph
            .node_indices()
            .map(|idx| (idx, Color::White))
            .collect();
        let mut path: Vec<NodeIndex> = Vec::new();

        // Every template is reachable from the root by construction, so a
        // single DFS suffices.
        if let Some(cycle) = Self::dfs_visit(&graph, start, &mut colors, &mut path) {
            let chain = cycle
                .iter()
                .map(|idx| graph[*idx].clone())
                .collect::<Vec<_>>()
                .join(" → ");
            return Err(DocforgeError::InclusionCycle {
                chain,
            });
        }
        Ok(())
    }

    fn dfs_visit(
        graph: &DiGraph<String, ()>,
        node: NodeIndex,
        colors: &mut HashMap<NodeIndex, Color>,
        path: &mut Vec<NodeIndex>,
    ) -> Option<Vec<NodeIndex>> {
        colors.insert(node, Color::Gray);
        path.push(node);

        for neighbor in graph.neighbors(node) {
            match colors.get(&neighbor) {
                Some(Color::Gray) => {
                    let start = path.iter().position(|n| *n == neighbor)?;
                    let mut cycle = path[start..].to_vec();
                    cycle.push(neighbor);
                    return Some(cycle);
                }
                Some(Color::White) => {
                    if let Some(cycle) = Self::dfs_visit(graph, neighbor, colors, path) {
                        return Some(cycle);
                    }
                }
                _ => {}
            }
        }

        path.pop();
        colors.insert(node, Color::Black);
        None
    }

    /// Reject templates included from more than one parent (or twice from
    /// the same parent): fragment paths would be ambiguous.
    fn reject_shared_inclusions(
        includes: &HashMap<String, Vec<String>>,
    ) -> Result<(), DocforgeError> {
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for (parent, children) in includes {
            for child in children {
                if let Some(other) = seen.insert(child.as_str(), parent.as_str()) {
                    return Err(DocforgeError::config(format!(
                        "Template '{child}' is included more than once (by '{other}' and '{parent}')"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Path of the root fragment.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Number of fragments in the tree.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the tree is empty. Never true for a built tree.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Fragment by tree path.
    pub fn get(&self, path: &str) -> Option<&Fragment> {
        self.fragments.get(path)
    }

    /// Fragments in deterministic pre-order.
    pub fn pre_order(&self) -> impl Iterator<Item = &Fragment> {
        self.order.iter().filter_map(|path| self.fragments.get(path))
    }

    /// Compute the minimal closed fragment set for a requested subset.
    ///
    /// The closure contains every requested fragment plus all of its
    /// ancestors up to the root, guaranteeing the rendered partial
    /// document keeps a present parent chain for every included child.
    /// Requesting nothing selects the whole tree.
    ///
    /// # Errors
    ///
    /// [`DocforgeError::UnknownFragment`] when a requested name does not
    /// exist in the tree.
    pub fn minimal_closure(&self, requested: &[String]) -> Result<BTreeSet<String>, DocforgeError> {
        if requested.is_empty() {
            return Ok(self.order.iter().cloned().collect());
        }

        let mut closure = BTreeSet::new();
        for name in requested {
            let path = self
                .by_name
                .get(name)
                .ok_or_else(|| DocforgeError::UnknownFragment {
                    name: name.clone(),
                })?;
            let mut current = Some(path.clone());
            while let Some(path) = current {
                if !closure.insert(path.clone()) {
                    break;
                }
                current = self.fragments.get(&path).and_then(|f| f.parent.clone());
            }
        }
        Ok(closure)
    }

    /// Whether a closure is a proper subset of the tree.
    pub fn is_partial(&self, closure: &BTreeSet<String>) -> bool {
        closure.len() < self.order.len()
    }

    /// Render the tree as an ASCII hierarchy for CLI inspection.
    pub fn to_tree_string(&self) -> String {
        let mut out = String::new();
        self.render_node(&self.root, "", true, &mut out);
        out
    }

    fn render_node(&self, path: &str, prefix: &str, is_last: bool, out: &mut String) {
        let Some(fragment) = self.fragments.get(path) else {
            return;
        };
        let connector = if prefix.is_empty() {
            ""
        } else if is_last {
            "└── "
        } else {
            "├── "
        };
        out.push_str(&format!("{prefix}{connector}{}\n", fragment.name));

        let child_prefix = if prefix.is_empty() {
            String::new()
        } else if is_last {
            format!("{prefix}    ")
        } else {
            format!("{prefix}│   ")
        };
        for (i, child) in fragment.children.iter().enumerate() {
            let last = i == fragment.children.len() - 1;
            // Root children need a prefix to start the connector column.
            let effective_prefix = if prefix.is_empty() {
                " ".to_string()
            } else {
                child_prefix.clone()
            };
            self.render_node(child, &effective_prefix, last, out);
        }
    }
}

fn template_basename(template: &str) -> String {
    std::path::Path::new(template)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| template.to_string())
}
