use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use jsonschema::JSONSchema;
use serde::Deserialize;

use crate::filter::{GlobClassFilter, GlobMemberFilter};

const PROFILE_SCHEMA: &str = include_str!("profile.schema.json");

const DEFAULT_MAX_OBFUSCATED_NAME_LEN: usize = 2;

/// Profile document as written on disk.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProfileDocument {
    excluded_classes: Vec<String>,
    excluded_fields: Vec<String>,
    excluded_methods: Vec<String>,
    entry_points: Vec<String>,
    scrambled_libraries: Vec<String>,
    max_obfuscated_name_len: Option<usize>,
    transformers: Option<Vec<String>>,
}

/// Exclusion filters, entry points and heuristics for one run.
#[derive(Debug)]
pub(crate) struct Profile {
    pub(crate) excluded_classes: GlobClassFilter,
    pub(crate) excluded_fields: GlobMemberFilter,
    pub(crate) excluded_methods: GlobMemberFilter,
    pub(crate) entry_points: GlobMemberFilter,
    pub(crate) scrambled_libraries: BTreeSet<String>,
    /// Names no longer than this look obfuscated; renaming longer ones is suspicious.
    pub(crate) max_obfuscated_name_len: usize,
    /// Pass names in execution order, `None` for the built-in order.
    pub(crate) transformers: Option<Vec<String>>,
}

impl Profile {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read profile {}", path.display()))?;
        let profile = Self::from_json(&text)
            .with_context(|| format!("invalid profile {}", path.display()))?;
        tracing::info!(path = %path.display(), "using deobfuscation profile");
        Ok(profile)
    }

    pub(crate) fn from_json(text: &str) -> Result<Self> {
        let instance: serde_json::Value =
            serde_json::from_str(text).context("failed to parse profile JSON")?;
        validate(&instance)?;
        let document: ProfileDocument =
            serde_json::from_value(instance).context("failed to decode profile")?;
        Self::from_document(document)
    }

    fn from_document(document: ProfileDocument) -> Result<Self> {
        Ok(Self {
            excluded_classes: GlobClassFilter::new(&document.excluded_classes)?,
            excluded_fields: GlobMemberFilter::new(&document.excluded_fields)?,
            excluded_methods: GlobMemberFilter::new(&document.excluded_methods)?,
            entry_points: GlobMemberFilter::new(&document.entry_points)?,
            scrambled_libraries: document.scrambled_libraries.into_iter().collect(),
            max_obfuscated_name_len: document
                .max_obfuscated_name_len
                .unwrap_or(DEFAULT_MAX_OBFUSCATED_NAME_LEN),
            transformers: document.transformers,
        })
    }

    /// Keeps constructors, static initializers and `main` in place; nothing is scrambled.
    pub(crate) fn builtin() -> Result<Self> {
        let protected: Vec<String> = ["**.<clinit> *", "**.<init> *", "**.main ([Ljava/lang/String;)V"]
            .iter()
            .map(|pattern| pattern.to_string())
            .collect();
        Self::from_document(ProfileDocument {
            excluded_methods: protected.clone(),
            entry_points: protected,
            ..ProfileDocument::default()
        })
    }
}

fn validate(instance: &serde_json::Value) -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(PROFILE_SCHEMA).context("failed to parse embedded profile schema")?;
    let compiled = JSONSchema::compile(&schema)
        .map_err(|error| anyhow::anyhow!("failed to compile profile schema: {error}"))?;
    if let Err(errors) = compiled.validate(instance) {
        let messages: Vec<String> = errors
            .map(|error| format!("{}: {}", error.instance_path, error))
            .collect();
        anyhow::bail!("profile does not match schema: {}", messages.join("; "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{ClassFilter, MemberFilter};

    #[test]
    fn profile_json_builds_filters() {
        let profile = Profile::from_json(
            r#"{
                "excluded_classes": ["client", "jaggl/**"],
                "excluded_methods": ["**.<init> *"],
                "excluded_fields": ["**.cache *"],
                "entry_points": ["client.<init> *", "**.main *"],
                "scrambled_libraries": ["client"],
                "max_obfuscated_name_len": 3
            }"#,
        )
        .expect("profile");

        assert!(profile.excluded_classes.matches("jaggl/opengl"));
        assert!(profile.excluded_fields.matches("a", "cache", "Ljava/util/Map;"));
        assert!(profile.entry_points.matches("client", "<init>", "()V"));
        assert!(!profile.entry_points.matches("loader", "<init>", "()V"));
        assert!(profile.scrambled_libraries.contains("client"));
        assert_eq!(profile.max_obfuscated_name_len, 3);
        assert!(profile.transformers.is_none());
    }

    #[test]
    fn missing_keys_use_defaults() {
        let profile = Profile::from_json("{}").expect("profile");

        assert_eq!(profile.max_obfuscated_name_len, 2);
        assert!(profile.scrambled_libraries.is_empty());
        assert!(!profile.excluded_classes.matches("client"));
    }

    #[test]
    fn schema_rejects_unknown_keys_and_bad_member_globs() {
        assert!(Profile::from_json(r#"{"excluded": []}"#).is_err());
        assert!(Profile::from_json(r#"{"entry_points": ["client"]}"#).is_err());
        assert!(Profile::from_json(r#"{"max_obfuscated_name_len": 0}"#).is_err());
    }

    #[test]
    fn builtin_profile_protects_constructors_and_main() {
        let profile = Profile::builtin().expect("profile");

        assert!(profile.excluded_methods.matches("a/B", "<init>", "(I)V"));
        assert!(profile.entry_points.matches("a/B", "<clinit>", "()V"));
        assert!(profile.entry_points.matches("client", "main", "([Ljava/lang/String;)V"));
        assert!(!profile.entry_points.matches("client", "run", "()V"));
    }
}
