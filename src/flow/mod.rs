//! Flow domain model and its interchange serialization.

pub mod node;
pub mod router;
pub mod types;

pub use node::{BasicNode, FlowContainer, FlowNode, GateKind, GatedNode, RandomNode, SwitchNode};
pub use router::{Exit, ExitTarget, NodeId, RandomRouter, RouterCase, RouterCategory, SwitchRouter};
pub use types::{Action, Flow, NamedRef};
