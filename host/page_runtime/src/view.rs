use crate::protocol::{Object, Operation};
use crate::registry::ComponentKind;
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt::Write;

/// Renderer output for one node of the page.
#[derive(Debug, Clone, PartialEq)]
pub enum View {
    Element(Element),
    /// Component whose `type` is not in the registry.
    Unsupported { name: String, type_name: String },
    /// Hierarchy referenced a component that was never defined.
    Missing { name: String },
    Cycle { name: String },
    /// Second reference to a component already placed in the tree.
    Shared { name: String },
}

impl View {
    pub fn name(&self) -> &str {
        match self {
            View::Element(element) => &element.name,
            View::Unsupported { name, .. }
            | View::Missing { name }
            | View::Cycle { name }
            | View::Shared { name } => name,
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            View::Element(element) => Some(element),
            _ => None,
        }
    }

    /// Depth-first search by component name.
    pub fn find(&self, name: &str) -> Option<&View> {
        if self.name() == name {
            return Some(self);
        }
        self.as_element()?
            .content
            .views()
            .find_map(|child| child.find(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub kind: ComponentKind,
    pub props: Object,
    pub data: Object,
    pub state: Object,
    pub operations: Vec<BoundOperation>,
    pub content: Content,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Content {
    #[default]
    Empty,
    Children(Vec<View>),
    Slots(IndexMap<String, Vec<View>>),
}

impl Content {
    pub fn views(&self) -> Box<dyn Iterator<Item = &View> + '_> {
        match self {
            Content::Empty => Box::new(std::iter::empty()),
            Content::Children(children) => Box::new(children.iter()),
            Content::Slots(slots) => Box::new(slots.values().flatten()),
        }
    }
}

/// An operation exposed to user interaction, as the renderer sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundOperation {
    pub name: String,
    pub key: String,
    pub text: Option<String>,
    pub reload: bool,
    pub disabled: bool,
    pub confirm: Option<String>,
}

impl BoundOperation {
    pub fn new(name: &str, operation: &Operation) -> Self {
        Self {
            name: name.to_string(),
            key: operation.effective_key(name).to_string(),
            text: operation.text.clone(),
            reload: operation.reload,
            disabled: operation.disabled,
            confirm: operation.confirm.clone(),
        }
    }
}

/// Indented text rendering of a view tree, one node per line.
pub fn outline(view: &View) -> String {
    let mut out = String::new();
    write_view(&mut out, view, 0);
    out
}

fn write_view(out: &mut String, view: &View, depth: usize) {
    let indent = "  ".repeat(depth);

    match view {
        View::Element(element) => {
            let _ = write!(out, "{indent}{} <{}>", element.name, element.kind.type_name());

            if let Some(text) = label(element) {
                let _ = write!(out, " \"{text}\"");
            }

            if !element.state.is_empty() {
                let _ = write!(out, " state={}", Value::Object(element.state.clone()));
            }

            if !element.operations.is_empty() {
                let ops: Vec<String> = element.operations.iter().map(op_label).collect();
                let _ = write!(out, " [{}]", ops.join(", "));
            }

            out.push('\n');

            match &element.content {
                Content::Empty => {}
                Content::Children(children) => {
                    for child in children {
                        write_view(out, child, depth + 1);
                    }
                }
                Content::Slots(slots) => {
                    for (slot, children) in slots {
                        let _ = writeln!(out, "{indent}  #{slot}");
                        for child in children {
                            write_view(out, child, depth + 2);
                        }
                    }
                }
            }
        }
        View::Unsupported { name, type_name } => {
            let _ = writeln!(out, "{indent}? {name} <{type_name}> unsupported component");
        }
        View::Missing { name } => {
            let _ = writeln!(out, "{indent}! {name} missing component");
        }
        View::Cycle { name } => {
            let _ = writeln!(out, "{indent}! {name} cyclic reference");
        }
        View::Shared { name } => {
            let _ = writeln!(out, "{indent}! {name} already placed");
        }
    }
}

fn label(element: &Element) -> Option<&str> {
    ["text", "title"].iter().find_map(|key| {
        element
            .props
            .get(*key)
            .or_else(|| element.data.get(*key))
            .and_then(Value::as_str)
    })
}

fn op_label(op: &BoundOperation) -> String {
    let mut label = op.name.clone();
    if op.reload {
        label.push('*');
    }
    if op.disabled {
        label.push_str(" (disabled)");
    }
    label
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(name: &str, kind: ComponentKind, content: Content) -> View {
        View::Element(Element {
            name: name.to_string(),
            kind,
            props: Object::new(),
            data: Object::new(),
            state: Object::new(),
            operations: Vec::new(),
            content,
        })
    }

    #[test]
    fn outline_indents_children_and_slots() {
        let mut slots = IndexMap::new();
        slots.insert(
            "left".to_string(),
            vec![element("nav", ComponentKind::Tree, Content::Empty)],
        );
        slots.insert(
            "right".to_string(),
            vec![View::Missing {
                name: "ghost".to_string(),
            }],
        );

        let root = element(
            "page",
            ComponentKind::Container,
            Content::Children(vec![element("split", ComponentKind::LRContainer, Content::Slots(slots))]),
        );

        assert_eq!(
            outline(&root),
            "page <Container>\n  split <LRContainer>\n    #left\n      nav <Tree>\n    #right\n      ! ghost missing component\n"
        );
    }

    #[test]
    fn outline_shows_label_state_and_operations() {
        let mut props = Object::new();
        props.insert("text".to_string(), Value::from("Add"));
        let mut state = Object::new();
        state.insert("visible".to_string(), Value::from(false));

        let view = View::Element(Element {
            name: "btn".to_string(),
            kind: ComponentKind::Button,
            props,
            data: Object::new(),
            state,
            operations: vec![BoundOperation {
                name: "click".to_string(),
                key: "click".to_string(),
                text: None,
                reload: true,
                disabled: false,
                confirm: None,
            }],
            content: Content::Empty,
        });

        assert_eq!(
            outline(&view),
            "btn <Button> \"Add\" state={\"visible\":false} [click*]\n"
        );
    }

    #[test]
    fn find_descends_into_slots() {
        let mut slots = IndexMap::new();
        slots.insert(
            "actions".to_string(),
            vec![element("add", ComponentKind::Button, Content::Empty)],
        );
        let root = element("table", ComponentKind::Table, Content::Slots(slots));

        assert!(root.find("add").is_some());
        assert!(root.find("nope").is_none());
    }
}
