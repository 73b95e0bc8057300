/// Naming transforms from database identifiers to GraphQL identifiers
///
/// An [`Inflector`] is an ordered list of pure string transforms for table
/// names and another for column names, plus the relation/root naming rules.
/// Plugins (from configuration) insert transforms ahead of the base ones or
/// switch the naming rules to the simplified style.

use crate::error::{PostgateError, Result};
use std::fmt;
use std::sync::Arc;

pub type NameTransform = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Clone)]
pub struct Inflector {
    table_transforms: Vec<NameTransform>,
    column_transforms: Vec<NameTransform>,
    simplify: bool,
}

impl fmt::Debug for Inflector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inflector")
            .field("table_transforms", &self.table_transforms.len())
            .field("column_transforms", &self.column_transforms.len())
            .field("simplify", &self.simplify)
            .finish()
    }
}

impl Default for Inflector {
    fn default() -> Self {
        Self::new()
    }
}

impl Inflector {
    /// Base rules: tables are singularized and PascalCased, columns camelCased
    pub fn new() -> Self {
        Self {
            table_transforms: vec![Arc::new(singularize_last_word), Arc::new(to_pascal_case)],
            column_transforms: vec![Arc::new(to_camel_case)],
            simplify: false,
        }
    }

    /// Build an inflector from plugin names, applied in order
    ///
    /// Known plugins:
    /// - `simplify` (alias `pg-simplify-inflector`)
    /// - `strip-table-prefix:<prefix>`
    /// - `strip-column-prefix:<prefix>`
    pub fn from_plugins(plugins: &[String]) -> Result<Self> {
        let mut inflector = Self::new();
        let mut table_pre: Vec<NameTransform> = Vec::new();
        let mut column_pre: Vec<NameTransform> = Vec::new();

        for plugin in plugins {
            let (name, arg) = match plugin.split_once(':') {
                Some((name, arg)) => (name.trim(), Some(arg.to_string())),
                None => (plugin.trim(), None),
            };
            match (name, arg) {
                ("simplify" | "pg-simplify-inflector", None) => inflector.simplify = true,
                ("strip-table-prefix", Some(prefix)) if !prefix.is_empty() => {
                    table_pre.push(strip_prefix(prefix));
                }
                ("strip-column-prefix", Some(prefix)) if !prefix.is_empty() => {
                    column_pre.push(strip_prefix(prefix));
                }
                _ => {
                    return Err(PostgateError::Config(format!(
                        "Unknown inflection plugin '{}'",
                        plugin
                    )))
                }
            }
        }

        table_pre.append(&mut inflector.table_transforms);
        column_pre.append(&mut inflector.column_transforms);
        inflector.table_transforms = table_pre;
        inflector.column_transforms = column_pre;
        Ok(inflector)
    }

    /// `books` → `Book`
    pub fn type_name(&self, table: &str) -> String {
        self.table_transforms
            .iter()
            .fold(table.to_string(), |name, transform| transform(&name))
    }

    /// `author_id` → `authorId`
    pub fn field_name(&self, column: &str) -> String {
        self.column_transforms
            .iter()
            .fold(column.to_string(), |name, transform| transform(&name))
    }

    /// `Book` → `Books`
    ///
    /// Simplified names drop the `all` and `By...` decorations, so there the
    /// plural must differ from the singular: `News` → `Newses`.
    pub fn plural_type(&self, type_name: &str) -> String {
        if self.simplify {
            distinct_pluralize_last_word(type_name)
        } else {
            pluralize_last_word(type_name)
        }
    }

    /// Root connection over all rows: `allBooks`, or `books` when simplified
    pub fn all_rows(&self, type_name: &str) -> String {
        let plural = self.plural_type(type_name);
        if self.simplify {
            lower_first(&plural)
        } else {
            format!("all{}", plural)
        }
    }

    /// Plain-list variant of a collection field
    pub fn list_field(&self, collection: &str) -> String {
        format!("{}List", collection)
    }

    /// Root lookup by primary key: `bookById`, or `book` when simplified
    pub fn row_by_key(&self, type_name: &str, key_columns: &[String]) -> String {
        if self.simplify {
            lower_first(type_name)
        } else {
            format!("{}By{}", lower_first(type_name), self.keys_suffix(key_columns))
        }
    }

    /// Forward (to-one) relation field on the referencing type
    pub fn forward_relation(&self, target_type: &str, fk_columns: &[String]) -> String {
        if self.simplify {
            if let [column] = fk_columns {
                if let Some(base) = relation_base_name(column) {
                    return self.field_name(base);
                }
            }
        }
        format!("{}By{}", lower_first(target_type), self.keys_suffix(fk_columns))
    }

    /// Reverse relation field on the referenced type
    ///
    /// `ambiguous` is set when several foreign keys link the same pair of
    /// tables; `one_to_one` when the foreign key columns are unique.
    pub fn reverse_relation(
        &self,
        source_type: &str,
        fk_columns: &[String],
        ambiguous: bool,
        one_to_one: bool,
    ) -> String {
        let base = if one_to_one {
            lower_first(source_type)
        } else {
            lower_first(&self.plural_type(source_type))
        };
        if self.simplify && !ambiguous {
            base
        } else {
            format!("{}By{}", base, self.keys_suffix(fk_columns))
        }
    }

    pub fn connection_type(&self, type_name: &str) -> String {
        format!("{}Connection", self.plural_type(type_name))
    }

    pub fn edge_type(&self, type_name: &str) -> String {
        format!("{}Edge", self.plural_type(type_name))
    }

    pub fn order_by_enum(&self, type_name: &str) -> String {
        format!("{}OrderBy", self.plural_type(type_name))
    }

    pub fn condition_type(&self, type_name: &str) -> String {
        format!("{}Condition", type_name)
    }

    pub fn input_type(&self, type_name: &str) -> String {
        format!("{}Input", type_name)
    }

    pub fn patch_type(&self, type_name: &str) -> String {
        format!("{}Patch", type_name)
    }

    pub fn create_mutation(&self, type_name: &str) -> String {
        format!("create{}", type_name)
    }

    pub fn update_mutation(&self, type_name: &str, key_columns: &[String]) -> String {
        if self.simplify {
            format!("update{}", type_name)
        } else {
            format!("update{}By{}", type_name, self.keys_suffix(key_columns))
        }
    }

    pub fn delete_mutation(&self, type_name: &str, key_columns: &[String]) -> String {
        if self.simplify {
            format!("delete{}", type_name)
        } else {
            format!("delete{}By{}", type_name, self.keys_suffix(key_columns))
        }
    }

    /// Order-by enum value for a column: `published_on` → `PUBLISHED_ON`
    pub fn enum_value(&self, column: &str) -> String {
        to_constant_case(&self.field_name(column))
    }

    fn keys_suffix(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| upper_first(&self.field_name(c)))
            .collect::<Vec<_>>()
            .join("And")
    }
}

fn strip_prefix(prefix: String) -> NameTransform {
    Arc::new(move |name: &str| {
        name.strip_prefix(prefix.as_str())
            .filter(|rest| !rest.is_empty())
            .unwrap_or(name)
            .to_string()
    })
}

/// Base name of a foreign key column: `author_id` → `author`
fn relation_base_name(column: &str) -> Option<&str> {
    const SUFFIXES: &[&str] = &["_row_id", "_uuid", "_id", "_fk", "_pk", "RowId", "Uuid", "Id", "Fk", "Pk"];
    SUFFIXES
        .iter()
        .find_map(|suffix| column.strip_suffix(suffix))
        .filter(|base| !base.is_empty())
}

/// `book_authors` → `BookAuthors`
pub fn to_pascal_case(s: &str) -> String {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(upper_first)
        .collect()
}

/// `book_authors` → `bookAuthors`
pub fn to_camel_case(s: &str) -> String {
    lower_first(&to_pascal_case(s))
}

/// `publishedOn` → `PUBLISHED_ON`
pub fn to_constant_case(s: &str) -> String {
    let mut result = String::new();
    let mut prev_lower = false;
    for ch in s.chars() {
        if !ch.is_alphanumeric() {
            if !result.is_empty() && !result.ends_with('_') {
                result.push('_');
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower {
            result.push('_');
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        result.extend(ch.to_uppercase());
    }
    result.trim_end_matches('_').to_string()
}

fn upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

const UNCOUNTABLE: &[&str] = &[
    "data", "equipment", "information", "media", "metadata", "news", "series", "species", "sheep",
    "fish",
];

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
    ("goose", "geese"),
    ("tooth", "teeth"),
    ("foot", "feet"),
];

/// Split off the last word of a snake_case or PascalCase identifier
fn split_last_word(s: &str) -> (&str, &str) {
    if let Some(idx) = s.rfind('_') {
        return (&s[..=idx], &s[idx + 1..]);
    }
    let idx = s
        .char_indices()
        .filter(|(i, c)| *i > 0 && c.is_uppercase())
        .map(|(i, _)| i)
        .last()
        .unwrap_or(0);
    (&s[..idx], &s[idx..])
}

fn match_case(template: &str, word: &str) -> String {
    if template.chars().next().is_some_and(char::is_uppercase) {
        upper_first(word)
    } else {
        word.to_string()
    }
}

pub fn singularize_last_word(s: &str) -> String {
    let (head, last) = split_last_word(s);
    format!("{}{}", head, singularize(last))
}

pub fn pluralize_last_word(s: &str) -> String {
    let (head, last) = split_last_word(s);
    format!("{}{}", head, pluralize(last))
}

/// Plural that never equals the singular
pub fn distinct_pluralize_last_word(s: &str) -> String {
    let (head, last) = split_last_word(s);
    let singular = singularize(last);
    let plural = pluralize(&singular);
    if plural != singular {
        return format!("{}{}", head, plural);
    }
    let lower = plural.to_lowercase();
    let distinct = if ["ch", "s", "sh", "z", "x"].iter().any(|suffix| lower.ends_with(suffix)) {
        format!("{}es", plural)
    } else if lower.ends_with('y') {
        format!("{}ies", &plural[..plural.len() - 1])
    } else {
        format!("{}s", plural)
    };
    format!("{}{}", head, distinct)
}

pub fn singularize(word: &str) -> String {
    let lower = word.to_lowercase();
    if !word.is_ascii() || UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }
    if let Some((singular, _)) = IRREGULAR.iter().find(|(_, plural)| *plural == lower) {
        return match_case(word, singular);
    }
    if IRREGULAR.iter().any(|(singular, _)| *singular == lower) {
        return word.to_string();
    }

    let stem_len = |suffix: &str| word.len() - suffix.len();
    if lower.ends_with("ies") && lower.len() > 3 {
        format!("{}y", &word[..stem_len("ies")])
    } else if ["sses", "xes", "ches", "shes", "zzes"]
        .iter()
        .any(|suffix| lower.ends_with(suffix))
    {
        word[..stem_len("es")].to_string()
    } else if lower.ends_with("ss") || lower.ends_with("us") || lower.ends_with("is") {
        word.to_string()
    } else if lower.ends_with('s') && lower.len() > 1 {
        word[..stem_len("s")].to_string()
    } else {
        word.to_string()
    }
}

pub fn pluralize(word: &str) -> String {
    let lower = word.to_lowercase();
    if !word.is_ascii() || UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }
    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == lower) {
        return match_case(word, plural);
    }
    if IRREGULAR.iter().any(|(_, plural)| *plural == lower) {
        return word.to_string();
    }

    let ends_with_consonant_y = lower.ends_with('y')
        && lower.len() > 1
        && !matches!(lower.chars().rev().nth(1), Some('a' | 'e' | 'i' | 'o' | 'u'));
    if ends_with_consonant_y {
        format!("{}ies", &word[..word.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|suffix| lower.ends_with(suffix)) {
        format!("{}es", word)
    } else {
        format!("{}s", word)
    }
}
