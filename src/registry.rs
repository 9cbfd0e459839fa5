//! Two-phase uuid registry for cross-flow object references.
//!
//! During compilation every group and flow mention is recorded, with or
//! without a known uuid. After all flows in a deployment have been compiled,
//! `generate_missing` mints uuids for names still without one, and `assign`
//! back-fills them into rendered flows. This keeps a name pointing at the
//! same uuid across every flow of a run.

use indexmap::IndexMap;
use thiserror::Error;
use uuid::Uuid;

use crate::flow::types::{Action, Flow};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("group '{name}' recorded with conflicting uuids '{existing}' and '{new}'")]
    GroupConflict {
        name: String,
        existing: String,
        new: String,
    },
    #[error("flow '{name}' recorded with conflicting uuids '{existing}' and '{new}'")]
    FlowConflict {
        name: String,
        existing: String,
        new: String,
    },
}

impl RegistryError {
    pub fn code(&self) -> &'static str {
        "U001"
    }
}

#[derive(Debug, Default)]
pub struct UuidRegistry {
    groups: IndexMap<String, Option<String>>,
    flows: IndexMap<String, Option<String>>,
}

fn record(
    table: &mut IndexMap<String, Option<String>>,
    name: &str,
    uuid: Option<&str>,
) -> Result<(), (String, String)> {
    let uuid = uuid.filter(|u| !u.is_empty());
    match table.get_mut(name) {
        None => {
            table.insert(name.to_string(), uuid.map(String::from));
            Ok(())
        }
        Some(slot) => match (slot.as_deref(), uuid) {
            // A later mention without a uuid never downgrades a known one.
            (_, None) => Ok(()),
            (None, Some(new)) => {
                *slot = Some(new.to_string());
                Ok(())
            }
            (Some(existing), Some(new)) if existing == new => Ok(()),
            (Some(existing), Some(new)) => Err((existing.to_string(), new.to_string())),
        },
    }
}

impl UuidRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a group mention. A second mention of the same name with a
    /// different non-empty uuid is fatal.
    pub fn record_group(&mut self, name: &str, uuid: Option<&str>) -> Result<(), RegistryError> {
        record(&mut self.groups, name, uuid).map_err(|(existing, new)| {
            RegistryError::GroupConflict {
                name: name.to_string(),
                existing,
                new,
            }
        })
    }

    pub fn record_flow(&mut self, name: &str, uuid: Option<&str>) -> Result<(), RegistryError> {
        record(&mut self.flows, name, uuid).map_err(|(existing, new)| {
            RegistryError::FlowConflict {
                name: name.to_string(),
                existing,
                new,
            }
        })
    }

    /// Mint uuids for every recorded name that still has none.
    pub fn generate_missing(&mut self) {
        for slot in self.groups.values_mut().chain(self.flows.values_mut()) {
            if slot.is_none() {
                *slot = Some(Uuid::new_v4().to_string());
            }
        }
    }

    pub fn group_uuid(&self, name: &str) -> Option<&str> {
        self.groups.get(name).and_then(|u| u.as_deref())
    }

    pub fn flow_uuid(&self, name: &str) -> Option<&str> {
        self.flows.get(name).and_then(|u| u.as_deref())
    }

    /// Fill empty uuid fields of group and flow references in a rendered
    /// flow. References to names the registry never saw are left as they
    /// are.
    pub fn assign(&self, flow: &mut Flow) {
        let fill = |uuid: &mut String, known: Option<&str>| {
            if uuid.is_empty()
                && let Some(known) = known
            {
                *uuid = known.to_string();
            }
        };
        for node in &mut flow.nodes {
            for action in &mut node.actions {
                match action {
                    Action::AddContactGroups { groups, .. }
                    | Action::RemoveContactGroups { groups, .. } => {
                        for group in groups {
                            fill(&mut group.uuid, self.group_uuid(&group.name));
                        }
                    }
                    Action::EnterFlow { flow: target, .. } => {
                        fill(&mut target.uuid, self.flow_uuid(&target.name));
                    }
                    _ => {}
                }
            }
        }
    }
}
