/// Opaque pagination cursors and keyset predicates
///
/// A cursor is the base64 encoding of `["<ORDER NAMES>", [key values...]]`,
/// where the values are the text forms of the ordering keys of a row (primary
/// key tie-break included). Seeking past a cursor compiles into a null-aware
/// predicate that follows PostgreSQL's default null placement: `NULLS LAST`
/// for ascending keys and `NULLS FIRST` for descending ones.

use crate::error::{PostgateError, Result};
use crate::plan::sql::{column_ref, Params};
use crate::schema::model::Direction;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value as JsonValue;

/// Ordering key resolved to a column and its SQL type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub sql_type: String,
    pub direction: Direction,
}

impl SortKey {
    pub fn reversed(&self) -> Self {
        Self {
            direction: self.direction.reversed(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub order: String,
    pub values: Vec<Option<String>>,
}

impl Cursor {
    pub fn encode(&self) -> String {
        let payload = serde_json::json!([self.order, self.values]);
        STANDARD.encode(payload.to_string())
    }

    /// Decode a cursor and check it belongs to `order` with `key_count` keys
    pub fn decode(raw: &str, order: &str, key_count: usize) -> Result<Self> {
        let bytes = STANDARD
            .decode(raw.trim())
            .map_err(|_| PostgateError::InvalidCursor("cursor is not valid base64".to_string()))?;
        let payload: JsonValue = serde_json::from_slice(&bytes)
            .map_err(|_| PostgateError::InvalidCursor("cursor is not valid JSON".to_string()))?;

        let (name, values) = match payload.as_array().map(Vec::as_slice) {
            Some([JsonValue::String(name), JsonValue::Array(values)]) => (name, values),
            _ => {
                return Err(PostgateError::InvalidCursor(
                    "unexpected cursor shape".to_string(),
                ))
            }
        };

        if name != order {
            return Err(PostgateError::InvalidCursor(format!(
                "cursor was issued for ordering '{}', not '{}'",
                name, order
            )));
        }
        if values.len() != key_count {
            return Err(PostgateError::InvalidCursor(format!(
                "cursor has {} values, expected {}",
                values.len(),
                key_count
            )));
        }

        let values = values
            .iter()
            .map(|value| match value {
                JsonValue::Null => Ok(None),
                JsonValue::String(s) => Ok(Some(s.clone())),
                _ => Err(PostgateError::InvalidCursor(
                    "cursor values must be strings".to_string(),
                )),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            order: name.clone(),
            values,
        })
    }
}

/// SQL expression producing the cursor of the row aliased `alias`
pub fn cursor_expression(alias: &str, order: &str, keys: &[SortKey]) -> String {
    let values = keys
        .iter()
        .map(|key| format!("to_jsonb({}::text)", column_ref(alias, &key.column)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "translate(encode(convert_to(jsonb_build_array({}, jsonb_build_array({}))::text, 'utf8'), 'base64'), E'\\n', '')",
        crate::plan::sql::quote_literal(order),
        values
    )
}

/// Keyset predicate over one row
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    False,
    IsNull(usize),
    IsNotNull(usize),
    /// key > value
    Greater(usize, String),
    /// key < value
    Less(usize, String),
    /// key IS NOT DISTINCT FROM value
    Same(usize, Option<String>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

/// Rows strictly after `values` in the order given by `keys`
///
/// Seeking backwards uses the same rule over reversed keys.
pub fn seek_after(keys: &[SortKey], values: &[Option<String>]) -> Predicate {
    let mut alternatives = Vec::with_capacity(keys.len());
    for (idx, key) in keys.iter().enumerate() {
        let mut terms: Vec<Predicate> = values[..idx]
            .iter()
            .enumerate()
            .map(|(prefix, value)| Predicate::Same(prefix, value.clone()))
            .collect();
        terms.push(strictly_after(idx, key.direction, values[idx].as_ref()));
        alternatives.push(Predicate::And(terms));
    }
    Predicate::Or(alternatives).simplify()
}

fn strictly_after(idx: usize, direction: Direction, value: Option<&String>) -> Predicate {
    match (direction, value) {
        // ascending, nulls last: nothing follows a null
        (Direction::Asc, None) => Predicate::False,
        (Direction::Asc, Some(v)) => {
            Predicate::Or(vec![Predicate::Greater(idx, v.clone()), Predicate::IsNull(idx)])
        }
        // descending, nulls first: every value follows a null
        (Direction::Desc, None) => Predicate::IsNotNull(idx),
        (Direction::Desc, Some(v)) => Predicate::Less(idx, v.clone()),
    }
}

impl Predicate {
    fn simplify(self) -> Predicate {
        match self {
            Predicate::And(terms) => {
                let terms: Vec<Predicate> = terms
                    .into_iter()
                    .map(Predicate::simplify)
                    .filter(|t| *t != Predicate::True)
                    .collect();
                if terms.contains(&Predicate::False) {
                    Predicate::False
                } else if terms.is_empty() {
                    Predicate::True
                } else if terms.len() == 1 {
                    terms.into_iter().next().unwrap_or(Predicate::True)
                } else {
                    Predicate::And(terms)
                }
            }
            Predicate::Or(terms) => {
                let terms: Vec<Predicate> = terms
                    .into_iter()
                    .map(Predicate::simplify)
                    .filter(|t| *t != Predicate::False)
                    .collect();
                if terms.contains(&Predicate::True) {
                    Predicate::True
                } else if terms.is_empty() {
                    Predicate::False
                } else if terms.len() == 1 {
                    terms.into_iter().next().unwrap_or(Predicate::False)
                } else {
                    Predicate::Or(terms)
                }
            }
            other => other,
        }
    }

    /// Render against the row aliased `alias`, binding values into `params`
    pub fn to_sql(&self, alias: &str, keys: &[SortKey], params: &mut Params) -> String {
        let col = |idx: usize| column_ref(alias, &keys[idx].column);
        match self {
            Predicate::True => "true".to_string(),
            Predicate::False => "false".to_string(),
            Predicate::IsNull(idx) => format!("{} IS NULL", col(*idx)),
            Predicate::IsNotNull(idx) => format!("{} IS NOT NULL", col(*idx)),
            Predicate::Greater(idx, value) => format!(
                "{} > {}",
                col(*idx),
                params.push_cast(Some(value.clone()), &keys[*idx].sql_type)
            ),
            Predicate::Less(idx, value) => format!(
                "{} < {}",
                col(*idx),
                params.push_cast(Some(value.clone()), &keys[*idx].sql_type)
            ),
            Predicate::Same(idx, None) => format!("{} IS NULL", col(*idx)),
            Predicate::Same(idx, Some(value)) => format!(
                "{} = {}",
                col(*idx),
                params.push_cast(Some(value.clone()), &keys[*idx].sql_type)
            ),
            Predicate::And(terms) => format!(
                "({})",
                terms
                    .iter()
                    .map(|t| t.to_sql(alias, keys, params))
                    .collect::<Vec<_>>()
                    .join(" AND ")
            ),
            Predicate::Or(terms) => format!(
                "({})",
                terms
                    .iter()
                    .map(|t| t.to_sql(alias, keys, params))
                    .collect::<Vec<_>>()
                    .join(" OR ")
            ),
        }
    }

    /// Evaluate over integer keys, mirroring the SQL semantics
    #[cfg(test)]
    pub fn eval(&self, row: &[Option<i64>]) -> bool {
        let parse = |v: &String| v.parse::<i64>().ok();
        match self {
            Predicate::True => true,
            Predicate::False => false,
            Predicate::IsNull(idx) => row[*idx].is_none(),
            Predicate::IsNotNull(idx) => row[*idx].is_some(),
            Predicate::Greater(idx, v) => matches!((row[*idx], parse(v)), (Some(a), Some(b)) if a > b),
            Predicate::Less(idx, v) => matches!((row[*idx], parse(v)), (Some(a), Some(b)) if a < b),
            Predicate::Same(idx, v) => row[*idx] == v.as_ref().and_then(parse),
            Predicate::And(terms) => terms.iter().all(|t| t.eval(row)),
            Predicate::Or(terms) => terms.iter().any(|t| t.eval(row)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    fn key(column: &str, direction: Direction) -> SortKey {
        SortKey {
            column: column.to_string(),
            sql_type: "integer".to_string(),
            direction,
        }
    }

    /// PostgreSQL default ordering of one key
    fn compare_key(a: Option<i64>, b: Option<i64>, direction: Direction) -> Ordering {
        let asc = match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => x.cmp(&y),
        };
        match direction {
            Direction::Asc => asc,
            Direction::Desc => asc.reverse(),
        }
    }

    fn sort(rows: &mut [Vec<Option<i64>>], keys: &[SortKey]) {
        rows.sort_by(|a, b| {
            keys.iter()
                .enumerate()
                .map(|(i, k)| compare_key(a[i], b[i], k.direction))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }

    fn text(row: &[Option<i64>]) -> Vec<Option<String>> {
        row.iter().map(|v| v.map(|n| n.to_string())).collect()
    }

    /// Page through `rows` with cursors and return the visit order
    fn page_through(rows: &[Vec<Option<i64>>], keys: &[SortKey], page: usize) -> Vec<Vec<Option<i64>>> {
        let mut ordered = rows.to_vec();
        sort(&mut ordered, keys);

        let mut visited = Vec::new();
        let mut after: Option<Vec<Option<String>>> = None;
        loop {
            let predicate = match &after {
                Some(values) => seek_after(keys, values),
                None => Predicate::True,
            };
            let batch: Vec<_> = ordered
                .iter()
                .filter(|row| predicate.eval(row))
                .take(page)
                .cloned()
                .collect();
            let Some(last) = batch.last() else { break };
            after = Some(text(last));
            visited.extend(batch);
        }
        visited
    }

    #[test]
    fn test_cursor_roundtrip_and_order_check() {
        let cursor = Cursor {
            order: "TITLE_ASC,PRIMARY_KEY_ASC".to_string(),
            values: vec![Some("Dune".to_string()), None],
        };
        let decoded = Cursor::decode(&cursor.encode(), "TITLE_ASC,PRIMARY_KEY_ASC", 2).unwrap();
        assert_eq!(decoded, cursor);

        let err = Cursor::decode(&cursor.encode(), "PRIMARY_KEY_ASC", 2).unwrap_err();
        assert!(matches!(err, PostgateError::InvalidCursor(_)));
        assert!(Cursor::decode(&cursor.encode(), "TITLE_ASC,PRIMARY_KEY_ASC", 1).is_err());
        assert!(Cursor::decode("@@@", "PRIMARY_KEY_ASC", 1).is_err());
    }

    #[test]
    fn test_tie_break_visits_every_row_once() {
        // (score, id): duplicate and null scores, unique id
        let rows: Vec<Vec<Option<i64>>> = vec![
            vec![Some(3), Some(1)],
            vec![Some(1), Some(2)],
            vec![None, Some(3)],
            vec![Some(3), Some(4)],
            vec![Some(1), Some(5)],
            vec![None, Some(6)],
            vec![Some(2), Some(7)],
            vec![Some(3), Some(8)],
        ];

        for direction in [Direction::Asc, Direction::Desc] {
            let keys = vec![key("score", direction), key("id", Direction::Asc)];
            for page in 1..=4 {
                let visited = page_through(&rows, &keys, page);
                let mut expected = rows.clone();
                sort(&mut expected, &keys);
                assert_eq!(visited, expected, "direction {:?}, page {}", direction, page);
            }
        }
    }

    #[test]
    fn test_backward_seek_is_reversed_forward_seek() {
        let rows: Vec<Vec<Option<i64>>> = (0..7)
            .map(|i| vec![if i % 3 == 0 { None } else { Some(i % 2) }, Some(i)])
            .collect();
        let keys = vec![key("flag", Direction::Asc), key("id", Direction::Asc)];
        let reversed: Vec<SortKey> = keys.iter().map(SortKey::reversed).collect();

        let forward = page_through(&rows, &keys, 2);
        let mut backward = page_through(&rows, &reversed, 2);
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_predicate_sql() {
        let keys = vec![key("score", Direction::Desc), key("id", Direction::Asc)];
        let predicate = seek_after(&keys, &[Some("3".to_string()), Some("4".to_string())]);
        let mut params = Params::default();
        let sql = predicate.to_sql("t2", &keys, &mut params);
        assert_eq!(
            sql,
            "(t2.\"score\" < $1::text::integer OR (t2.\"score\" = $2::text::integer AND (t2.\"id\" > $3::text::integer OR t2.\"id\" IS NULL)))"
        );
    }

    #[test]
    fn test_null_cursor_value_ascending() {
        let keys = vec![key("score", Direction::Asc), key("id", Direction::Asc)];
        let predicate = seek_after(&keys, &[None, Some("3".to_string())]);
        assert!(predicate.eval(&[None, Some(4)]));
        assert!(!predicate.eval(&[Some(10), Some(9)]));
    }
}
