//! Declarative config-page runtime.
//!
//! A backend describes a page as a flat component map plus a hierarchy; the
//! runtime resolves that into a tree, renders it through a component
//! registry, and turns user operations into either local state commits or
//! protocol round trips, one at a time per page.

pub mod config;
pub mod error;
pub mod executor;
pub mod hierarchy;
pub mod mock;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod view;

pub use crate::config::{ConcurrencyPolicy, RuntimeConfig};
pub use crate::error::{PageError, TransportError};
pub use crate::executor::{NoHooks, Outcome, PageHooks, PageInstance, PageOptions, Phase, Snapshot};
pub use crate::hierarchy::{HierarchyIssue, Resolution, ResolvedNode, resolve, resolve_page};
pub use crate::mock::{MockFixture, MockTransport, select_transport};
pub use crate::protocol::{
    Command, ComponentSpec, Event, Hierarchy, Object, Operation, PageConfig, RenderConfig, Scenario,
};
pub use crate::registry::{
    ComponentKind, CustomProps, Injected, OperationSink, PageView, Registry, Renderer, render_page,
};
pub use crate::transport::{
    HttpTransport, ProcessTransport, ProtocolTransport, REQUEST_FRAME_CAP, RESPONSE_FRAME_CAP,
};
pub use crate::view::{View, outline};
pub use serde_json;
