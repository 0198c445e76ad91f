//! Closed set of component kinds and the dispatch from a component's `type`
//! to its renderer.

use crate::hierarchy::{HierarchyIssue, ResolvedChildren, ResolvedNode, resolve_page};
use crate::protocol::{ComponentSpec, Object, PageConfig, merge_shallow};
use crate::view::{BoundOperation, Content, Element, View};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

macro_rules! component_kinds {
    ($($variant:ident => $type_name:literal),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ComponentKind {
            $($variant),+
        }

        impl ComponentKind {
            pub const ALL: &'static [ComponentKind] = &[$(ComponentKind::$variant),+];

            pub fn from_type_name(type_name: &str) -> Option<Self> {
                match type_name {
                    $($type_name => Some(ComponentKind::$variant),)+
                    _ => None,
                }
            }

            pub fn type_name(self) -> &'static str {
                match self {
                    $(ComponentKind::$variant => $type_name),+
                }
            }
        }
    };
}

component_kinds! {
    Container => "Container",
    LRContainer => "LRContainer",
    RowContainer => "RowContainer",
    SplitPage => "SplitPage",
    Grid => "Grid",
    Card => "Card",
    CardList => "CardList",
    Panel => "Panel",
    Tabs => "Tabs",
    Popover => "Popover",
    Modal => "Modal",
    Drawer => "Drawer",
    Kanban => "Kanban",
    Table => "Table",
    List => "List",
    Tree => "Tree",
    TreeSelect => "TreeSelect",
    FileTree => "FileTree",
    Form => "Form",
    Filter => "Filter",
    ContractiveFilter => "ContractiveFilter",
    ConfigurableFilter => "ConfigurableFilter",
    Button => "Button",
    Dropdown => "Dropdown",
    DropdownSelect => "DropdownSelect",
    Radio => "Radio",
    Select => "Select",
    InputSelect => "InputSelect",
    Input => "Input",
    DatePicker => "DatePicker",
    SortGroup => "SortGroup",
    Pagination => "Pagination",
    Alert => "Alert",
    Badge => "Badge",
    Breadcrumb => "Breadcrumb",
    Tag => "Tag",
    Text => "Text",
    Title => "Title",
    TextGroup => "TextGroup",
    Icon => "Icon",
    Image => "Image",
    Markdown => "Markdown",
    Chart => "Chart",
    Progress => "Progress",
    Timeline => "Timeline",
    EmptyHolder => "EmptyHolder",
}

impl ComponentKind {
    /// Slots a container places in a fixed order. Slots not listed here
    /// follow in declared order.
    pub fn canonical_slots(self) -> &'static [&'static str] {
        match self {
            ComponentKind::LRContainer | ComponentKind::SplitPage => &["left", "right"],
            ComponentKind::Card | ComponentKind::Panel => &["title", "content", "extra"],
            ComponentKind::Modal | ComponentKind::Drawer => &["content", "footer"],
            _ => &[],
        }
    }
}

/// Callbacks injected into every renderer; implemented by the page instance.
pub trait OperationSink: Send + Sync {
    fn exec_operation(&self, component: &str, operation: &str, data: Option<Object>);
    fn update_state(&self, component: &str, state: Object);
}

/// Sink for static rendering where nothing can be dispatched.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedSink;

impl OperationSink for DetachedSink {
    fn exec_operation(&self, component: &str, operation: &str, _data: Option<Object>) {
        warn!(component, operation, "operation fired on a detached render");
    }

    fn update_state(&self, component: &str, _state: Object) {
        warn!(component, "state update on a detached render");
    }
}

/// Per-instance overrides supplied by the page owner, keyed by component name.
pub type CustomProps = HashMap<String, Object>;

/// The common props handed to every renderer, bound to one component.
#[derive(Clone)]
pub struct Injected {
    component: String,
    sink: Arc<dyn OperationSink>,
    custom_props: Option<Object>,
}

impl Injected {
    pub fn new(
        component: impl Into<String>,
        sink: Arc<dyn OperationSink>,
        custom_props: Option<Object>,
    ) -> Self {
        Self {
            component: component.into(),
            sink,
            custom_props,
        }
    }

    pub fn exec_operation(&self, operation: &str, data: Option<Object>) {
        self.sink.exec_operation(&self.component, operation, data);
    }

    pub fn update_state(&self, state: Object) {
        self.sink.update_state(&self.component, state);
    }

    pub fn custom_props(&self) -> Option<&Object> {
        self.custom_props.as_ref()
    }
}

pub struct RenderInput<'a> {
    pub name: &'a str,
    pub kind: ComponentKind,
    pub spec: &'a ComponentSpec,
    pub content: Content,
}

pub trait Renderer: Send + Sync {
    fn render(&self, input: RenderInput<'_>, injected: &Injected) -> View;
}

/// Default renderer: the component's own props with custom props merged on
/// top, data and state passed through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct ElementRenderer;

impl Renderer for ElementRenderer {
    fn render(&self, input: RenderInput<'_>, injected: &Injected) -> View {
        let props = match injected.custom_props() {
            Some(custom) => merge_shallow(input.spec.props.as_ref(), custom),
            None => input.spec.props.clone().unwrap_or_default(),
        };

        let operations = input
            .spec
            .operations
            .iter()
            .map(|(name, operation)| BoundOperation::new(name, operation))
            .collect();

        View::Element(Element {
            name: input.name.to_string(),
            kind: input.kind,
            props,
            data: input.spec.data.clone().unwrap_or_default(),
            state: input.spec.state.clone().unwrap_or_default(),
            operations,
            content: place_slots(input.kind, input.content),
        })
    }
}

fn place_slots(kind: ComponentKind, content: Content) -> Content {
    let Content::Slots(mut slots) = content else {
        return content;
    };

    let canonical = kind.canonical_slots();
    if canonical.is_empty() {
        return Content::Slots(slots);
    }

    let mut placed = IndexMap::with_capacity(slots.len());
    for slot in canonical {
        if let Some(children) = slots.shift_remove(*slot) {
            placed.insert((*slot).to_string(), children);
        }
    }
    placed.extend(slots);
    Content::Slots(placed)
}

/// Maps component kinds to renderers. Kinds are fixed at compile time; only
/// the renderer behind a kind can be replaced.
pub struct Registry {
    renderers: HashMap<ComponentKind, Arc<dyn Renderer>>,
    fallback: Arc<dyn Renderer>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            renderers: HashMap::new(),
            fallback: Arc::new(ElementRenderer),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_renderer(mut self, kind: ComponentKind, renderer: impl Renderer + 'static) -> Self {
        self.renderers.insert(kind, Arc::new(renderer));
        self
    }

    pub fn render(
        &self,
        name: &str,
        spec: &ComponentSpec,
        content: Content,
        injected: &Injected,
    ) -> View {
        let Some(kind) = ComponentKind::from_type_name(&spec.type_name) else {
            warn!(component = name, type_name = %spec.type_name, "unsupported component type");
            return View::Unsupported {
                name: name.to_string(),
                type_name: spec.type_name.clone(),
            };
        };

        let renderer = self.renderers.get(&kind).unwrap_or(&self.fallback);
        renderer.render(
            RenderInput {
                name,
                kind,
                spec,
                content,
            },
            injected,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageView {
    pub root: View,
    pub issues: Vec<HierarchyIssue>,
}

/// Resolve the hierarchy and render every reachable component.
pub fn render_page(
    registry: &Registry,
    page: &PageConfig,
    custom_props: &CustomProps,
    sink: Arc<dyn OperationSink>,
) -> PageView {
    let resolution = resolve_page(page);
    for issue in &resolution.issues {
        warn!(%issue, "degraded page hierarchy");
    }

    let pass = RenderPass {
        registry,
        page,
        custom_props,
        sink,
    };

    PageView {
        root: pass.render_node(&resolution.root),
        issues: resolution.issues,
    }
}

struct RenderPass<'a> {
    registry: &'a Registry,
    page: &'a PageConfig,
    custom_props: &'a CustomProps,
    sink: Arc<dyn OperationSink>,
}

impl RenderPass<'_> {
    fn render_node(&self, node: &ResolvedNode) -> View {
        match node {
            ResolvedNode::Missing { name } => View::Missing { name: name.clone() },
            ResolvedNode::Cycle { name } => View::Cycle { name: name.clone() },
            ResolvedNode::Shared { name } => View::Shared { name: name.clone() },
            ResolvedNode::Component { name, children } => {
                let Some(spec) = self.page.component(name) else {
                    return View::Missing { name: name.clone() };
                };

                let content = match children {
                    ResolvedChildren::None => Content::Empty,
                    ResolvedChildren::List(nodes) => {
                        Content::Children(nodes.iter().map(|child| self.render_node(child)).collect())
                    }
                    ResolvedChildren::Slots(slots) => Content::Slots(
                        slots
                            .iter()
                            .map(|(slot, nodes)| {
                                (
                                    slot.clone(),
                                    nodes.iter().map(|child| self.render_node(child)).collect(),
                                )
                            })
                            .collect(),
                    ),
                };

                let injected = Injected::new(
                    name.clone(),
                    self.sink.clone(),
                    self.custom_props.get(name).cloned(),
                );
                self.registry.render(name, spec, content, &injected)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::outline;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<String>>,
    }

    impl OperationSink for RecordingSink {
        fn exec_operation(&self, component: &str, operation: &str, _data: Option<Object>) {
            self.calls
                .lock()
                .expect("sink lock")
                .push(format!("exec {component}.{operation}"));
        }

        fn update_state(&self, component: &str, _state: Object) {
            self.calls
                .lock()
                .expect("sink lock")
                .push(format!("state {component}"));
        }
    }

    fn page(value: Value) -> PageConfig {
        serde_json::from_value(value).expect("valid page config")
    }

    fn object(value: Value) -> Object {
        serde_json::from_value(value).expect("object")
    }

    #[test]
    fn type_names_round_trip_through_the_closed_set() {
        assert!(ComponentKind::ALL.len() >= 40);
        for kind in ComponentKind::ALL {
            assert_eq!(ComponentKind::from_type_name(kind.type_name()), Some(*kind));
        }
        assert_eq!(ComponentKind::from_type_name("container"), None);
    }

    #[test]
    fn unknown_type_renders_placeholder() {
        let spec = ComponentSpec::new("HoloDeck");
        let injected = Injected::new("x", Arc::new(DetachedSink), None);

        let view = Registry::new().render("x", &spec, Content::Empty, &injected);
        assert_eq!(
            view,
            View::Unsupported {
                name: "x".to_string(),
                type_name: "HoloDeck".to_string(),
            }
        );
    }

    #[test]
    fn custom_props_win_per_top_level_key_only() {
        let mut spec = ComponentSpec::new("Table");
        spec.props = Some(object(json!({
            "pageSize": 10,
            "columns": {"name": {"width": 100}, "age": {"width": 50}}
        })));

        let custom = object(json!({"columns": {"name": {"width": 300}}, "bordered": true}));
        let injected = Injected::new("table", Arc::new(DetachedSink), Some(custom));

        let view = Registry::new().render("table", &spec, Content::Empty, &injected);
        let element = view.as_element().expect("element");
        assert_eq!(element.props["pageSize"], 10);
        assert_eq!(element.props["bordered"], true);
        assert_eq!(element.props["columns"], json!({"name": {"width": 300}}));
        assert_eq!(spec.props.as_ref().expect("props")["columns"]["age"]["width"], 50);
    }

    #[test]
    fn table_rows_are_passed_through_unsorted() {
        let mut spec = ComponentSpec::new("Table");
        spec.data = Some(object(json!({"list": [{"id": 3}, {"id": 1}, {"id": 2}]})));
        let injected = Injected::new("t", Arc::new(DetachedSink), None);

        let view = Registry::new().render("t", &spec, Content::Empty, &injected);
        let element = view.as_element().expect("element");
        assert_eq!(element.data["list"], json!([{"id": 3}, {"id": 1}, {"id": 2}]));
    }

    #[test]
    fn canonical_slots_are_placed_first() {
        let mut slots = IndexMap::new();
        slots.insert("extra".to_string(), Vec::new());
        slots.insert("right".to_string(), Vec::new());
        slots.insert("left".to_string(), Vec::new());

        let spec = ComponentSpec::new("LRContainer");
        let injected = Injected::new("lr", Arc::new(DetachedSink), None);
        let view = Registry::new().render("lr", &spec, Content::Slots(slots), &injected);

        let Content::Slots(placed) = &view.as_element().expect("element").content else {
            panic!("expected slots");
        };
        let order: Vec<_> = placed.keys().map(String::as_str).collect();
        assert_eq!(order, vec!["left", "right", "extra"]);
    }

    struct ShoutRenderer;

    impl Renderer for ShoutRenderer {
        fn render(&self, input: RenderInput<'_>, injected: &Injected) -> View {
            injected.exec_operation("click", None);
            injected.update_state(Object::new());
            View::Unsupported {
                name: input.name.to_uppercase(),
                type_name: input.kind.type_name().to_string(),
            }
        }
    }

    #[test]
    fn overridden_renderer_receives_bound_callbacks() {
        let sink = Arc::new(RecordingSink::default());
        let registry = Registry::new().with_renderer(ComponentKind::Button, ShoutRenderer);
        let config = page(json!({
            "hierarchy": {"root": "page", "structure": {"page": ["btn"]}},
            "components": {"page": {"type": "Container"}, "btn": {"type": "Button"}}
        }));

        let rendered = render_page(&registry, &config, &CustomProps::new(), sink.clone());
        assert!(rendered.root.find("BTN").is_some());
        assert_eq!(
            *sink.calls.lock().expect("sink lock"),
            vec!["exec btn.click".to_string(), "state btn".to_string()]
        );
    }

    #[test]
    fn page_degrades_per_subtree() {
        let config = page(json!({
            "hierarchy": {"root": "page", "structure": {"page": ["ghost", "weird", "btn"]}},
            "components": {
                "page": {"type": "Container"},
                "weird": {"type": "HoloDeck"},
                "btn": {
                    "type": "Button",
                    "props": {"text": "Go"},
                    "operations": {"click": {"key": "click", "reload": true}}
                }
            }
        }));

        let rendered = render_page(
            &Registry::new(),
            &config,
            &CustomProps::new(),
            Arc::new(DetachedSink),
        );

        assert_eq!(rendered.issues.len(), 1);
        assert_eq!(
            outline(&rendered.root),
            "page <Container>\n  ! ghost missing component\n  ? weird <HoloDeck> unsupported component\n  btn <Button> \"Go\" [click*]\n"
        );
    }

    #[test]
    fn shared_component_renders_once() {
        let config = page(json!({
            "hierarchy": {"root": "page", "structure": {"page": ["a", "b"], "a": ["t"], "b": ["t"]}},
            "components": {
                "page": {"type": "Container"},
                "a": {"type": "Container"},
                "b": {"type": "Container"},
                "t": {"type": "Text", "data": {"text": "hi"}}
            }
        }));

        let rendered = render_page(
            &Registry::new(),
            &config,
            &CustomProps::new(),
            Arc::new(DetachedSink),
        );

        assert_eq!(rendered.issues.len(), 1);
        assert_eq!(
            outline(&rendered.root),
            "page <Container>\n  a <Container>\n    t <Text> \"hi\"\n  b <Container>\n    ! t already placed\n"
        );
    }
}
