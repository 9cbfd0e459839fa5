//! Serde types for the flow-definition interchange format.
//!
//! These are the wire shapes round-trip tests compare bit-for-bit; field
//! order and optionality follow the target runtime's flow JSON.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const SPEC_VERSION: &str = "13.1.0";
pub const DEFAULT_LANGUAGE: &str = "eng";
pub const DEFAULT_FLOW_TYPE: &str = "messaging";
pub const DEFAULT_EXPIRE_MINUTES: u32 = 60;

// =============================================================================
// FLOW
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flow {
    pub uuid: String,
    pub name: String,
    pub language: String,
    #[serde(rename = "type")]
    pub flow_type: String,
    pub nodes: Vec<NodeDef>,
    pub spec_version: String,
    pub revision: u32,
    pub expire_after_minutes: u32,
    pub metadata: serde_json::Value,
    pub localization: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeDef {
    pub uuid: String,
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<RouterDef>,
    pub exits: Vec<ExitDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExitDef {
    pub uuid: String,
    pub destination_uuid: Option<String>,
}

// =============================================================================
// ROUTERS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum RouterDef {
    #[serde(rename = "switch")]
    Switch(SwitchRouterDef),
    #[serde(rename = "random")]
    Random(RandomRouterDef),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwitchRouterDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<WaitDef>,
    pub operand: String,
    pub cases: Vec<CaseDef>,
    pub categories: Vec<CategoryDef>,
    pub default_category_uuid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RandomRouterDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_name: Option<String>,
    pub categories: Vec<CategoryDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseDef {
    pub uuid: String,
    #[serde(rename = "type")]
    pub comparison_type: String,
    pub arguments: Vec<String>,
    pub category_uuid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryDef {
    pub uuid: String,
    pub name: String,
    pub exit_uuid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitDef {
    #[serde(rename = "type")]
    pub wait_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutDef>,
}

impl WaitDef {
    pub fn msg(timeout: Option<TimeoutDef>) -> Self {
        WaitDef {
            wait_type: "msg".into(),
            timeout,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutDef {
    pub seconds: u64,
    pub category_uuid: String,
}

// =============================================================================
// ACTIONS
// =============================================================================

/// A reference to a group or flow by uuid and name. The uuid may be empty
/// until the registry's assign phase fills it in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamedRef {
    pub uuid: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldRef {
    pub key: String,
    pub name: String,
}

/// The action subset needed to reproduce branching semantics plus the
/// common authoring verbs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Action {
    #[serde(rename = "send_msg")]
    SendMsg {
        uuid: String,
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        quick_replies: Vec<String>,
    },
    #[serde(rename = "set_contact_field")]
    SetContactField {
        uuid: String,
        field: FieldRef,
        value: String,
    },
    #[serde(rename = "set_run_result")]
    SetRunResult {
        uuid: String,
        name: String,
        value: String,
        #[serde(default)]
        category: String,
    },
    #[serde(rename = "add_contact_groups")]
    AddContactGroups { uuid: String, groups: Vec<NamedRef> },
    #[serde(rename = "remove_contact_groups")]
    RemoveContactGroups { uuid: String, groups: Vec<NamedRef> },
    #[serde(rename = "enter_flow")]
    EnterFlow { uuid: String, flow: NamedRef },
    #[serde(rename = "call_webhook")]
    CallWebhook {
        uuid: String,
        method: String,
        url: String,
        #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
        headers: IndexMap<String, String>,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        body: String,
        result_name: String,
    },
    #[serde(rename = "transfer_airtime")]
    TransferAirtime {
        uuid: String,
        amounts: IndexMap<String, String>,
        result_name: String,
    },
}

impl Action {
    pub fn uuid(&self) -> &str {
        match self {
            Action::SendMsg { uuid, .. }
            | Action::SetContactField { uuid, .. }
            | Action::SetRunResult { uuid, .. }
            | Action::AddContactGroups { uuid, .. }
            | Action::RemoveContactGroups { uuid, .. }
            | Action::EnterFlow { uuid, .. }
            | Action::CallWebhook { uuid, .. }
            | Action::TransferAirtime { uuid, .. } => uuid,
        }
    }
}
