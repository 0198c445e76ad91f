use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object as carried on the wire (`state`, `data`, `props`, `inParams`).
pub type Object = Map<String, Value>;

/// Backend protocol definition selected for a page. Set once at mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub scenario_key: String,
    pub scenario_type: String,
}

impl Scenario {
    pub fn new(scenario_key: impl Into<String>, scenario_type: impl Into<String>) -> Self {
        Self {
            scenario_key: scenario_key.into(),
            scenario_type: scenario_type.into(),
        }
    }
}

/// User action forwarded to the backend on a reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub component: String,
    pub operation: String,
    #[serde(default)]
    pub operation_data: Object,
}

/// Top-level message exchanged with the backend in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderConfig {
    pub scenario: Scenario,
    #[serde(default)]
    pub in_params: Object,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<PageConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,
}

impl RenderConfig {
    /// Request for the first fetch of a scenario: no protocol, no event.
    pub fn initial(scenario: Scenario, in_params: Object) -> Self {
        Self {
            scenario,
            in_params,
            protocol: None,
            event: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageConfig {
    pub hierarchy: Hierarchy,
    #[serde(default)]
    pub components: IndexMap<String, ComponentSpec>,
    /// Page-level hints the backend expects echoed back untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Object>,
}

impl PageConfig {
    pub fn component(&self, name: &str) -> Option<&ComponentSpec> {
        self.components.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hierarchy {
    pub root: String,
    #[serde(default)]
    pub structure: IndexMap<String, Children>,
}

/// Children of one node: a plain ordered list, or named slots for
/// multi-slot containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Children {
    List(Vec<String>),
    Slots(IndexMap<String, SlotChildren>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotChildren {
    One(String),
    Many(Vec<String>),
}

impl SlotChildren {
    pub fn names(&self) -> &[String] {
        match self {
            SlotChildren::One(name) => std::slice::from_ref(name),
            SlotChildren::Many(names) => names,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Object>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Object>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Object>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub operations: IndexMap<String, Operation>,
}

impl ComponentSpec {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: None,
            state: None,
            data: None,
            props: None,
            operations: IndexMap::new(),
        }
    }

    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.operations.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Backend operation key. Empty means "same as the operation's name".
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub reload: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Command>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_render: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_meta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Object>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Object,
}

impl Operation {
    pub fn reloading(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reload: true,
            ..Self::default()
        }
    }

    pub fn local(key: impl Into<String>, command: Command) -> Self {
        Self {
            key: key.into(),
            command: Some(command),
            ..Self::default()
        }
    }

    pub fn effective_key<'a>(&'a self, name: &'a str) -> &'a str {
        if self.key.is_empty() { name } else { &self.key }
    }

    /// A command that can be applied without a round trip.
    pub fn local_command(&self) -> Option<&Command> {
        if self.reload {
            return None;
        }
        self.command.as_ref().filter(|command| !command.jump_out)
    }

    pub fn jump_out(&self) -> Option<&Command> {
        self.command.as_ref().filter(|command| command.jump_out)
    }

    /// Event payload for this operation: `meta` merged under the caller's
    /// data, with the data copied to `meta[fill_meta]` when requested.
    pub fn operation_data(&self, local_patch: Option<Object>) -> Object {
        let mut data = local_patch.unwrap_or_default();
        if self.meta.is_none() && self.fill_meta.is_none() {
            return data;
        }

        let mut meta = self.meta.clone().unwrap_or_default();
        if let Some(fill_key) = &self.fill_meta {
            meta.insert(fill_key.clone(), Value::Object(data.clone()));
        }
        data.insert("meta".to_string(), Value::Object(meta));
        data
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Object>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub jump_out: bool,
    #[serde(flatten)]
    pub extra: Object,
}

/// Shallow merge: every top-level key of `overlay` replaces the same key in
/// `base`. Nested objects are not merged.
pub fn merge_shallow(base: Option<&Object>, overlay: &Object) -> Object {
    let mut merged = base.cloned().unwrap_or_default();
    for (key, value) in overlay {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_render_config_with_list_and_slot_children() {
        let payload = br#"{
            "scenario": {"scenarioKey": "project-list", "scenarioType": "project-list"},
            "inParams": {"projectId": 7},
            "protocol": {
                "hierarchy": {
                    "root": "page",
                    "structure": {
                        "page": ["filter", "table"],
                        "table": {"actions": "add", "footer": ["pager", "summary"]}
                    }
                },
                "components": {
                    "page": {"type": "Container"},
                    "filter": {"type": "ContractiveFilter", "state": {"values": {}}},
                    "table": {
                        "type": "Table",
                        "data": {"list": [{"id": 2}, {"id": 1}]},
                        "operations": {
                            "changePageNo": {"key": "changePageNo", "reload": true}
                        }
                    }
                }
            }
        }"#;

        let decoded: RenderConfig = serde_json::from_slice(payload).expect("decode render config");
        assert_eq!(decoded.scenario.scenario_key, "project-list");
        assert_eq!(decoded.in_params["projectId"], 7);
        assert!(decoded.event.is_none());

        let page = decoded.protocol.expect("protocol present");
        assert_eq!(page.hierarchy.root, "page");

        match &page.hierarchy.structure["page"] {
            Children::List(names) => assert_eq!(names, &["filter", "table"]),
            other => panic!("expected list children, got {other:?}"),
        }

        match &page.hierarchy.structure["table"] {
            Children::Slots(slots) => {
                let slot_names: Vec<_> = slots.keys().cloned().collect();
                assert_eq!(slot_names, vec!["actions", "footer"]);
                assert_eq!(slots["actions"].names(), &["add".to_string()]);
                assert_eq!(slots["footer"].names().len(), 2);
            }
            other => panic!("expected slot children, got {other:?}"),
        }

        let op = page.components["table"].operation("changePageNo").expect("op");
        assert!(op.reload);
        assert!(op.local_command().is_none());
    }

    #[test]
    fn encodes_request_with_camel_case_event() {
        let request = RenderConfig {
            event: Some(Event {
                component: "btn".to_string(),
                operation: "click".to_string(),
                operation_data: Object::new(),
            }),
            ..RenderConfig::initial(Scenario::new("k", "t"), Object::new())
        };

        let value = serde_json::to_value(&request).expect("encode request");
        assert_eq!(value["scenario"]["scenarioKey"], "k");
        assert_eq!(value["event"]["operationData"], json!({}));
        assert!(value.get("protocol").is_none());
    }

    #[test]
    fn operation_keeps_unknown_fields_and_defaults_flags() {
        let op: Operation =
            serde_json::from_value(json!({"key": "delete", "confirm": "Sure?", "icon": "trash"}))
                .expect("decode op");
        assert!(!op.reload);
        assert!(!op.disabled);
        assert_eq!(op.confirm.as_deref(), Some("Sure?"));
        assert_eq!(op.extra["icon"], "trash");

        let encoded = serde_json::to_value(&op).expect("encode op");
        assert_eq!(encoded["icon"], "trash");
        assert!(encoded.get("disabled").is_none());
    }

    #[test]
    fn empty_key_falls_back_to_operation_name() {
        let op = Operation::default();
        assert_eq!(op.effective_key("click"), "click");
        let op = Operation::reloading("submit");
        assert_eq!(op.effective_key("click"), "submit");
    }

    #[test]
    fn jump_out_command_is_not_local() {
        let op = Operation::local(
            "goto",
            Command {
                key: "goto".to_string(),
                jump_out: true,
                ..Command::default()
            },
        );
        assert!(op.local_command().is_none());
        assert!(op.jump_out().is_some());
    }

    #[test]
    fn operation_data_fills_meta() {
        let mut meta = Object::new();
        meta.insert("id".to_string(), json!(3));
        let op = Operation {
            key: "edit".to_string(),
            fill_meta: Some("values".to_string()),
            meta: Some(meta),
            ..Operation::default()
        };

        let mut patch = Object::new();
        patch.insert("name".to_string(), json!("n1"));

        let data = op.operation_data(Some(patch));
        assert_eq!(data["name"], "n1");
        assert_eq!(data["meta"]["id"], 3);
        assert_eq!(data["meta"]["values"]["name"], "n1");
    }

    #[test]
    fn operation_data_defaults_to_empty_object() {
        let op = Operation::reloading("click");
        assert!(op.operation_data(None).is_empty());
    }

    #[test]
    fn shallow_merge_replaces_whole_top_level_values() {
        let base: Object = serde_json::from_value(json!({"a": {"x": 1, "y": 2}, "b": 1}))
            .expect("base");
        let overlay: Object = serde_json::from_value(json!({"a": {"x": 9}})).expect("overlay");

        let merged = merge_shallow(Some(&base), &overlay);
        assert_eq!(merged["a"], json!({"x": 9}));
        assert_eq!(merged["b"], 1);
    }
}
