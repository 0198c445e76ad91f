//! Resolution of `hierarchy.structure` into an ordered component tree.
//!
//! Structural problems never abort resolution: a bad reference becomes an
//! inline node so the renderer can degrade just that subtree.

use crate::protocol::{Children, ComponentSpec, Hierarchy, PageConfig};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedNode {
    Component {
        name: String,
        children: ResolvedChildren,
    },
    /// Referenced name with no entry in `components`.
    Missing { name: String },
    /// Name already present on the current path.
    Cycle { name: String },
    /// Name already expanded under another parent.
    Shared { name: String },
}

impl ResolvedNode {
    pub fn name(&self) -> &str {
        match self {
            ResolvedNode::Component { name, .. }
            | ResolvedNode::Missing { name }
            | ResolvedNode::Cycle { name }
            | ResolvedNode::Shared { name } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResolvedChildren {
    #[default]
    None,
    List(Vec<ResolvedNode>),
    Slots(IndexMap<String, Vec<ResolvedNode>>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HierarchyIssue {
    #[error("component '{name}' referenced by '{parent}' is not defined")]
    MissingComponent { parent: String, name: String },
    #[error("root component '{0}' is not defined")]
    MissingRoot(String),
    #[error("component '{name}' appears in its own ancestry under '{parent}'")]
    Cycle { parent: String, name: String },
    #[error("component '{name}' under '{parent}' is already placed elsewhere")]
    SharedNode { parent: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub root: ResolvedNode,
    pub issues: Vec<HierarchyIssue>,
}

impl Resolution {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

pub fn resolve(
    hierarchy: &Hierarchy,
    components: &IndexMap<String, ComponentSpec>,
) -> Resolution {
    let mut walker = Walker {
        hierarchy,
        components,
        path: IndexSet::new(),
        expanded: HashSet::new(),
        issues: Vec::new(),
    };

    let root = if components.contains_key(&hierarchy.root) {
        walker.visit(&hierarchy.root)
    } else {
        walker
            .issues
            .push(HierarchyIssue::MissingRoot(hierarchy.root.clone()));
        ResolvedNode::Missing {
            name: hierarchy.root.clone(),
        }
    };

    Resolution {
        root,
        issues: walker.issues,
    }
}

pub fn resolve_page(page: &PageConfig) -> Resolution {
    resolve(&page.hierarchy, &page.components)
}

/// Components defined on the page but never reached from the root.
pub fn unreachable(page: &PageConfig) -> Vec<String> {
    let resolution = resolve_page(page);
    let mut seen = IndexSet::new();
    collect_names(&resolution.root, &mut seen);

    page.components
        .keys()
        .filter(|name| !seen.contains(name.as_str()))
        .cloned()
        .collect()
}

fn collect_names<'a>(node: &'a ResolvedNode, seen: &mut IndexSet<&'a str>) {
    seen.insert(node.name());
    if let ResolvedNode::Component { children, .. } = node {
        match children {
            ResolvedChildren::None => {}
            ResolvedChildren::List(nodes) => {
                nodes.iter().for_each(|child| collect_names(child, seen));
            }
            ResolvedChildren::Slots(slots) => slots
                .values()
                .flatten()
                .for_each(|child| collect_names(child, seen)),
        }
    }
}

struct Walker<'a> {
    hierarchy: &'a Hierarchy,
    components: &'a IndexMap<String, ComponentSpec>,
    path: IndexSet<String>,
    // Each component is expanded at most once per resolution.
    expanded: HashSet<String>,
    issues: Vec<HierarchyIssue>,
}

impl Walker<'_> {
    fn visit(&mut self, name: &str) -> ResolvedNode {
        self.path.insert(name.to_string());
        self.expanded.insert(name.to_string());

        let hierarchy = self.hierarchy;
        let children = match hierarchy.structure.get(name) {
            None => ResolvedChildren::None,
            Some(Children::List(names)) => {
                ResolvedChildren::List(self.visit_all(name, names))
            }
            Some(Children::Slots(slots)) => ResolvedChildren::Slots(
                slots
                    .iter()
                    .map(|(slot, names)| (slot.clone(), self.visit_all(name, names.names())))
                    .collect(),
            ),
        };

        self.path.pop();
        ResolvedNode::Component {
            name: name.to_string(),
            children,
        }
    }

    fn visit_all(&mut self, parent: &str, names: &[String]) -> Vec<ResolvedNode> {
        names.iter().map(|name| self.visit_child(parent, name)).collect()
    }

    fn visit_child(&mut self, parent: &str, name: &str) -> ResolvedNode {
        if self.path.contains(name) {
            self.issues.push(HierarchyIssue::Cycle {
                parent: parent.to_string(),
                name: name.to_string(),
            });
            return ResolvedNode::Cycle {
                name: name.to_string(),
            };
        }

        if self.expanded.contains(name) {
            self.issues.push(HierarchyIssue::SharedNode {
                parent: parent.to_string(),
                name: name.to_string(),
            });
            return ResolvedNode::Shared {
                name: name.to_string(),
            };
        }

        if !self.components.contains_key(name) {
            self.issues.push(HierarchyIssue::MissingComponent {
                parent: parent.to_string(),
                name: name.to_string(),
            });
            return ResolvedNode::Missing {
                name: name.to_string(),
            };
        }

        self.visit(name)
    }
}
