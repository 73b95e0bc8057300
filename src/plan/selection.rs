/// Selection tree handed to the plan compiler
///
/// Built from the engine's look-ahead view of the current field, with
/// variables already substituted and fragments flattened. Fields sharing a
/// response key are merged.

use crate::error::{PostgateError, Result};
use async_graphql::SelectionField;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectedField {
    pub name: String,
    pub alias: Option<String>,
    pub arguments: IndexMap<String, JsonValue>,
    pub selection: Vec<SelectedField>,
}

impl SelectedField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    pub fn with_selection(mut self, selection: Vec<SelectedField>) -> Self {
        self.selection = merge(selection);
        self
    }

    /// Key the field's value is stored under in the result document
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn argument(&self, name: &str) -> Option<&JsonValue> {
        self.arguments.get(name).filter(|v| !v.is_null())
    }

    /// Convert the engine's view of a field
    pub fn from_engine(field: SelectionField<'_>) -> Result<Self> {
        let arguments = field
            .arguments()
            .map_err(|e| PostgateError::UnsupportedSelection(e.message))?
            .into_iter()
            .map(|(name, value)| {
                let json = value
                    .into_json()
                    .map_err(|e| PostgateError::InvalidArgument {
                        name: name.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok((name.to_string(), json))
            })
            .collect::<Result<IndexMap<_, _>>>()?;

        let selection = field
            .selection_set()
            .filter(|child| !child.name().starts_with("__"))
            .map(SelectedField::from_engine)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: field.name().to_string(),
            alias: field.alias().map(str::to_string),
            arguments,
            selection: merge(selection),
        })
    }
}

/// Merge fields with the same response key, concatenating their sub-selections
fn merge(fields: Vec<SelectedField>) -> Vec<SelectedField> {
    let mut merged: IndexMap<String, SelectedField> = IndexMap::new();
    for field in fields {
        match merged.get_mut(field.response_key()) {
            Some(existing) => {
                let mut selection = std::mem::take(&mut existing.selection);
                selection.extend(field.selection);
                existing.selection = merge(selection);
            }
            None => {
                merged.insert(field.response_key().to_string(), field);
            }
        }
    }
    merged.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_key() {
        assert_eq!(SelectedField::new("title").response_key(), "title");
        assert_eq!(
            SelectedField::new("title").with_alias("heading").response_key(),
            "heading"
        );
    }

    #[test]
    fn test_duplicate_keys_merge() {
        let field = SelectedField::new("allBooks").with_selection(vec![
            SelectedField::new("nodes").with_selection(vec![SelectedField::new("id")]),
            SelectedField::new("nodes").with_selection(vec![
                SelectedField::new("id"),
                SelectedField::new("title"),
            ]),
        ]);

        assert_eq!(field.selection.len(), 1);
        let names: Vec<&str> = field.selection[0]
            .selection
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["id", "title"]);
    }

    #[test]
    fn test_null_argument_is_absent() {
        let field = SelectedField::new("allBooks").with_argument("first", json!(null));
        assert!(field.argument("first").is_none());
    }
}
