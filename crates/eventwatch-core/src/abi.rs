//! Contract ABI model — event definitions with a precomputed name lookup.
//!
//! Only `event` entries of the standard JSON ABI are retained; functions,
//! constructors, and errors are irrelevant to log indexing. The name → event
//! map is built once at parse time so the processor never scans the entry
//! list per lookup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single event parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInput {
    pub name: String,
    /// Canonical ABI type string, e.g. `"uint256"`, `"address"`, `"bytes32"`.
    #[serde(rename = "type")]
    pub ty: String,
    /// EVM: indexed parameters live in topics, the rest in the data payload.
    #[serde(default)]
    pub indexed: bool,
}

/// Definition of one event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDef {
    pub name: String,
    pub inputs: Vec<EventInput>,
}

impl EventDef {
    /// Canonical signature string, e.g. `"Transfer(address,address,uint256)"`.
    pub fn signature(&self) -> String {
        let types: Vec<&str> = self.inputs.iter().map(|i| i.ty.as_str()).collect();
        format!("{}({})", self.name, types.join(","))
    }

    /// Parameters carried in topics, in declaration order.
    pub fn indexed_inputs(&self) -> Vec<&EventInput> {
        self.inputs.iter().filter(|i| i.indexed).collect()
    }

    /// Parameters carried in the data payload, in declaration order.
    pub fn data_inputs(&self) -> Vec<&EventInput> {
        self.inputs.iter().filter(|i| !i.indexed).collect()
    }
}

/// Parsed contract ABI restricted to its event entries.
///
/// Serializes as a plain array of event definitions; the lookup map is
/// rebuilt on deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Vec<EventDef>", into = "Vec<EventDef>")]
pub struct ContractAbi {
    events: Vec<EventDef>,
    by_name: HashMap<String, usize>,
}

impl ContractAbi {
    /// Build from already-parsed event definitions.
    pub fn from_events(events: Vec<EventDef>) -> Self {
        let by_name = events
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();
        Self { events, by_name }
    }

    /// Parse a standard JSON ABI array, keeping only `event` entries.
    pub fn parse_json(json: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct RawEntry {
            #[serde(rename = "type")]
            kind: String,
            #[serde(flatten)]
            rest: serde_json::Value,
        }

        let entries: Vec<RawEntry> = serde_json::from_str(json)?;
        let mut events = Vec::new();
        for entry in entries {
            if entry.kind == "event" {
                events.push(serde_json::from_value::<EventDef>(entry.rest)?);
            }
        }
        Ok(Self::from_events(events))
    }

    /// Look up an event definition by name.
    pub fn event(&self, name: &str) -> Option<&EventDef> {
        self.by_name.get(name).map(|&i| &self.events[i])
    }

    /// Returns `true` if the ABI defines an event with this name.
    pub fn has_event(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// All event definitions in declaration order.
    pub fn events(&self) -> &[EventDef] {
        &self.events
    }
}

impl From<Vec<EventDef>> for ContractAbi {
    fn from(events: Vec<EventDef>) -> Self {
        Self::from_events(events)
    }
}

impl From<ContractAbi> for Vec<EventDef> {
    fn from(abi: ContractAbi) -> Self {
        abi.events
    }
}
