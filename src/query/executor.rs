use tracing::debug;

use crate::db::Schema;
use crate::primitives::pager::{CommitRecord, PageSource};
use crate::storage::{index, RecordScan, Value};
use crate::types::{RecordId, Result};

use super::planner::{plan, QueryPlan, QueryStrategy};

/// Ids of `type_name` records whose `field` equals `value`, ascending.
///
/// The value must have the field's declared kind.
pub fn find_equal<S: PageSource>(
    src: S,
    roots: &CommitRecord,
    schema: &Schema,
    type_name: &str,
    field: &str,
    value: &Value,
    strategy: QueryStrategy,
) -> Result<Vec<RecordId>> {
    let plan = plan(schema, type_name, field, strategy)?;
    schema.type_info(type_name)?.check_value(field, value)?;
    let ids = execute(src, roots, &plan, value)?;
    debug!(
        type_name,
        field,
        index = plan.uses_index(),
        hits = ids.len(),
        "query.find_equal"
    );
    Ok(ids)
}

/// Runs an already validated plan.
pub fn execute<S: PageSource>(
    src: S,
    roots: &CommitRecord,
    plan: &QueryPlan,
    value: &Value,
) -> Result<Vec<RecordId>> {
    match plan {
        QueryPlan::IndexLookup { type_name, field } => {
            index::lookup_equal(&src, roots.index_root, type_name, field, value)
        }
        QueryPlan::FullScan { type_name, field } => {
            let mut ids = Vec::new();
            for record in RecordScan::new(src, roots, type_name) {
                let record = record?;
                if record.get(field) == Some(value) {
                    ids.push(record.id);
                }
            }
            Ok(ids)
        }
    }
}
