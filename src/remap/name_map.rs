use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ir::MemberRef;

/// Curated name for one member, optionally naming the holder class of a relocated static.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub(crate) struct MemberMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) owner: Option<String>,
    pub(crate) name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct NameMapDocument {
    classes: BTreeMap<String, String>,
    fields: BTreeMap<String, MemberMapping>,
    methods: BTreeMap<String, MemberMapping>,
}

/// Names keyed by original class name or original `owner.name descriptor`. Lookups for a
/// partition take the first member with an entry.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct NameMap {
    pub(crate) classes: BTreeMap<String, String>,
    pub(crate) fields: BTreeMap<MemberRef, MemberMapping>,
    pub(crate) methods: BTreeMap<MemberRef, MemberMapping>,
}

impl NameMap {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read name map {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid name map {}", path.display()))
    }

    pub(crate) fn from_json(text: &str) -> Result<Self> {
        let document: NameMapDocument =
            serde_json::from_str(text).context("failed to parse name map JSON")?;
        Ok(Self {
            classes: document.classes,
            fields: parse_members(document.fields)?,
            methods: parse_members(document.methods)?,
        })
    }

    pub(crate) fn to_json(&self) -> Result<String> {
        let document = NameMapDocument {
            classes: self.classes.clone(),
            fields: format_members(&self.fields),
            methods: format_members(&self.methods),
        };
        serde_json::to_string_pretty(&document).context("failed to serialize name map")
    }

    pub(crate) fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        fs::write(path, json + "\n")
            .with_context(|| format!("failed to write name map {}", path.display()))
    }

    pub(crate) fn map_class_name(&self, name: &str, default: String) -> String {
        self.classes.get(name).cloned().unwrap_or(default)
    }

    pub(crate) fn map_field_name(&self, partition: &[MemberRef], default: String) -> String {
        lookup(&self.fields, partition).map_or(default, |mapping| mapping.name.clone())
    }

    pub(crate) fn map_field_owner(&self, partition: &[MemberRef], default: String) -> String {
        lookup(&self.fields, partition)
            .and_then(|mapping| mapping.owner.clone())
            .unwrap_or(default)
    }

    pub(crate) fn map_method_name(&self, partition: &[MemberRef], default: String) -> String {
        lookup(&self.methods, partition).map_or(default, |mapping| mapping.name.clone())
    }

    pub(crate) fn map_method_owner(&self, partition: &[MemberRef], default: String) -> String {
        lookup(&self.methods, partition)
            .and_then(|mapping| mapping.owner.clone())
            .unwrap_or(default)
    }
}

fn lookup<'a>(
    entries: &'a BTreeMap<MemberRef, MemberMapping>,
    partition: &[MemberRef],
) -> Option<&'a MemberMapping> {
    partition.iter().find_map(|member| entries.get(member))
}

fn parse_members(
    entries: BTreeMap<String, MemberMapping>,
) -> Result<BTreeMap<MemberRef, MemberMapping>> {
    entries
        .into_iter()
        .map(|(key, mapping)| {
            let member = key
                .parse::<MemberRef>()
                .with_context(|| format!("invalid member key '{key}'"))?;
            Ok((member, mapping))
        })
        .collect()
}

fn format_members(entries: &BTreeMap<MemberRef, MemberMapping>) -> BTreeMap<String, MemberMapping> {
    entries
        .iter()
        .map(|(member, mapping)| (member.to_string(), mapping.clone()))
        .collect()
}
