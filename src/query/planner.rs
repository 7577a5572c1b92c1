use std::fmt;

use serde::Serialize;

use crate::db::Schema;
use crate::types::Result;

/// Caller preference for how an equality query is answered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueryStrategy {
    /// Use the index when one exists.
    #[default]
    Auto,
    /// Always scan the type's records, even if the field is indexed.
    FullScan,
}

/// Access path chosen for an equality query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum QueryPlan {
    /// Prefix walk of the secondary index.
    IndexLookup {
        /// Record type.
        #[serde(rename = "type")]
        type_name: String,
        /// Indexed field.
        field: String,
    },
    /// Walk of the type's extent, comparing each record's field.
    FullScan {
        /// Record type.
        #[serde(rename = "type")]
        type_name: String,
        /// Compared field.
        field: String,
    },
}

impl QueryPlan {
    /// True for the index path.
    pub fn uses_index(&self) -> bool {
        matches!(self, QueryPlan::IndexLookup { .. })
    }

    /// Record type the plan reads.
    pub fn type_name(&self) -> &str {
        match self {
            QueryPlan::IndexLookup { type_name, .. } | QueryPlan::FullScan { type_name, .. } => {
                type_name
            }
        }
    }

    /// Field the predicate applies to.
    pub fn field(&self) -> &str {
        match self {
            QueryPlan::IndexLookup { field, .. } | QueryPlan::FullScan { field, .. } => field,
        }
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryPlan::IndexLookup { type_name, field } => {
                write!(f, "index lookup on {type_name}.{field}")
            }
            QueryPlan::FullScan { type_name, field } => {
                write!(f, "full scan of {type_name} filtering on {field}")
            }
        }
    }
}

/// Plans `type_name.field = ?`.
///
/// Fails with `Schema` if the type or the field is not declared.
pub fn plan(
    schema: &Schema,
    type_name: &str,
    field: &str,
    strategy: QueryStrategy,
) -> Result<QueryPlan> {
    let info = schema.type_info(type_name)?;
    info.field_kind(field)?;
    let type_name = type_name.to_owned();
    let field = field.to_owned();
    Ok(match strategy {
        QueryStrategy::Auto if info.is_indexed(&field) => QueryPlan::IndexLookup { type_name, field },
        _ => QueryPlan::FullScan { type_name, field },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{StoreConfig, TypeSchema};
    use crate::storage::ValueKind;
    use crate::types::PenumbraError;

    fn schema() -> Schema {
        Schema::from_config(
            &StoreConfig::new("x").with_type(
                TypeSchema::new("Item")
                    .field("number", ValueKind::String)
                    .field("label", ValueKind::String)
                    .index("number"),
            ),
        )
    }

    #[test]
    fn indexed_field_uses_the_index_unless_forced() {
        let schema = schema();
        let auto = plan(&schema, "Item", "number", QueryStrategy::Auto).unwrap();
        assert!(auto.uses_index());
        assert_eq!(auto.to_string(), "index lookup on Item.number");
        let forced = plan(&schema, "Item", "number", QueryStrategy::FullScan).unwrap();
        assert!(!forced.uses_index());
        let plain = plan(&schema, "Item", "label", QueryStrategy::Auto).unwrap();
        assert_eq!(plain.field(), "label");
        assert!(!plain.uses_index());
    }

    #[test]
    fn undeclared_names_are_schema_errors() {
        let schema = schema();
        assert!(matches!(
            plan(&schema, "Nope", "number", QueryStrategy::Auto),
            Err(PenumbraError::Schema(_))
        ));
        assert!(matches!(
            plan(&schema, "Item", "nope", QueryStrategy::Auto),
            Err(PenumbraError::Schema(_))
        ));
    }

    #[test]
    fn plan_serializes_with_path_tag() {
        let json = serde_json::to_value(
            plan(&schema(), "Item", "number", QueryStrategy::Auto).unwrap(),
        )
        .unwrap();
        assert_eq!(json["path"], "index_lookup");
        assert_eq!(json["type"], "Item");
    }
}
