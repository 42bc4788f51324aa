// Query aggregation - one batched child query instead of one per row
//
// The collector walks every parent row before any rendering happens and
// accumulates, per configured token, the column values the child query
// will filter on. The executor turns each accumulated set into an IN
// predicate on a single child query. The partitioner splits the aggregated
// result back into per-row slices by matching those same column values.

use crate::error::{NestViewError, Result};
use crate::token::{escape_markup, TokenDescriptor, TokenKind};
use crate::view::{PagerConfig, ParentContext, Row, RowKey, ViewHandle, ViewRegistry};
use serde_json::Value;
use std::collections::HashMap;

/// One argument column of the batched child query: the accumulated value
/// set across all parent rows plus each row's own value for re-matching.
#[derive(Debug, Clone)]
pub struct ArgumentBinding {
    /// Child/parent result column the values were read from and will be
    /// filtered on.
    pub column: String,
    /// Ordered, de-duplicated accumulation across all rows; becomes the IN
    /// predicate.
    pub values: Vec<Value>,
    /// Each parent row's own value, used to select its result slice.
    pub per_row: HashMap<RowKey, Value>,
}

/// Everything one embed field precomputes for a render pass: the bindings,
/// the per-row slices of the aggregated result, and the child handle the
/// slices render through. Built once before row rendering, discarded after
/// the pass.
pub struct AggregationState<H> {
    bindings: Vec<ArgumentBinding>,
    slices: HashMap<RowKey, Vec<Row>>,
    child: Option<H>,
}

impl<H> AggregationState<H> {
    /// State with nothing collected: every row renders as empty.
    pub fn empty() -> Self {
        AggregationState {
            bindings: Vec::new(),
            slices: HashMap::new(),
            child: None,
        }
    }

    pub(crate) fn new(
        bindings: Vec<ArgumentBinding>,
        slices: HashMap<RowKey, Vec<Row>>,
        child: H,
    ) -> Self {
        AggregationState {
            bindings,
            slices,
            child: Some(child),
        }
    }

    /// True when no token produced a binding (aggregation degraded to
    /// "no results" for this pass).
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn bindings(&self) -> &[ArgumentBinding] {
        &self.bindings
    }

    /// The result slice for one parent row.
    pub fn slice(&self, key: RowKey) -> Option<&[Row]> {
        self.slices.get(&key).map(|rows| rows.as_slice())
    }

    pub fn child(&self) -> Option<&H> {
        self.child.as_ref()
    }
}

/// Pre-pass over all parent rows: accumulate, per field token in
/// configuration order, the column values the batched query needs.
///
/// Positional and literal tokens contribute no binding - they do not vary
/// by row. A multi-valued cell is reduced per entry (raw tokens take the
/// sub-value at the field's primary alias, rendered tokens a representative
/// render of it) and collapsed to a scalar when one element remains.
pub fn collect_bindings(
    tokens: &[TokenDescriptor],
    rows: &[Row],
    parent: &ParentContext,
) -> Vec<ArgumentBinding> {
    let mut bindings = Vec::new();

    for token in tokens {
        if !parent.fields.contains(&token.key) {
            continue;
        }
        let alias = match token.kind {
            TokenKind::Rendered => parent.fields.rendered_alias(&token.key),
            TokenKind::Raw | TokenKind::Default => parent.fields.raw_alias(&token.key),
        };
        let Some(alias) = alias else {
            continue;
        };
        let primary = parent.fields.primary_alias(&token.key);

        let mut binding = ArgumentBinding {
            column: alias.clone(),
            values: Vec::new(),
            per_row: HashMap::new(),
        };

        for row in rows {
            let cell = row.value_at(&alias).cloned().unwrap_or(Value::Null);
            let value = match cell {
                Value::Array(entries) => reduce_entries(&entries, token.kind, primary.as_deref()),
                other => other,
            };
            accumulate(&mut binding.values, &value);
            binding.per_row.insert(row.key(), value);
        }

        bindings.push(binding);
    }

    log::debug!(
        "collected {} argument binding(s) across {} row(s)",
        bindings.len(),
        rows.len()
    );
    bindings
}

/// Reduce the entries of a multi-valued cell, collapsing to a scalar when
/// exactly one element remains.
fn reduce_entries(entries: &[Value], kind: TokenKind, primary: Option<&str>) -> Value {
    let mut reduced: Vec<Value> = entries
        .iter()
        .map(|entry| {
            let sub = match (entry, primary) {
                (Value::Object(map), Some(alias)) => map.get(alias).cloned().unwrap_or(Value::Null),
                _ => entry.clone(),
            };
            match kind {
                TokenKind::Rendered => Value::String(escape_markup(&scalar_text(&sub))),
                TokenKind::Raw | TokenKind::Default => sub,
            }
        })
        .collect();

    if reduced.len() == 1 {
        reduced.remove(0)
    } else {
        Value::Array(reduced)
    }
}

/// Add a value (or each element of a list value) to the accumulated IN set,
/// preserving first-seen order. Nulls never filter.
fn accumulate(values: &mut Vec<Value>, value: &Value) {
    match value {
        Value::Null => {}
        Value::Array(elements) => {
            for element in elements {
                accumulate(values, element);
            }
        }
        other => {
            if !values.contains(other) {
                values.push(other.clone());
            }
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build and run the single batched child query.
///
/// Loads the child view once, positions it on the configured display,
/// drops the display's own paging (the partitioner limits per row instead)
/// and adds one hidden IN predicate per binding in token order. Zero
/// matches is an empty result, not an error.
pub fn execute_batched<R: ViewRegistry>(
    registry: &R,
    view: &str,
    display: &str,
    bindings: &[ArgumentBinding],
) -> Result<(R::Handle, Vec<Row>)> {
    let mut child = registry
        .view_by_name(view)
        .ok_or_else(|| NestViewError::ViewNotFound(view.to_string()))?;
    if !child.check_access(display) {
        return Err(NestViewError::AccessDenied {
            view: view.to_string(),
            display: display.to_string(),
        });
    }
    child.set_display(display)?;
    child.disable_paging();
    for binding in bindings {
        child.add_value_filter(&binding.column, &binding.values);
    }
    let rows = child.execute(&[])?;
    log::debug!("batched child query for {view}/{display} returned {} row(s)", rows.len());
    Ok((child, rows))
}

/// Split the aggregated result into per-row slices.
///
/// A parent row's slice holds every aggregated row whose bound columns
/// equal that row's binding values on ALL bindings. The child display's
/// pager then limits each slice: the matched subset is chunked into pages
/// of `items_per_page` and only the page at `offset` is kept. This is a
/// best-effort emulation - the aggregated query itself is not paginated
/// per argument group.
pub fn partition_rows(
    aggregated: &[Row],
    bindings: &[ArgumentBinding],
    pager: PagerConfig,
) -> HashMap<RowKey, Vec<Row>> {
    let mut slices = HashMap::new();
    let Some(first) = bindings.first() else {
        return slices;
    };

    for &row_key in first.per_row.keys() {
        let mut matched: Vec<Row> = aggregated
            .iter()
            .filter(|candidate| {
                bindings.iter().all(|binding| {
                    let Some(bound) = binding.per_row.get(&row_key) else {
                        return false;
                    };
                    candidate
                        .value_at(&binding.column)
                        .map(|cell| values_match(bound, cell))
                        .unwrap_or(false)
                })
            })
            .cloned()
            .collect();

        if pager.items_per_page > 0 {
            let size = pager.items_per_page as usize;
            matched = matched
                .chunks(size)
                .nth(pager.offset as usize)
                .map(|chunk| chunk.to_vec())
                .unwrap_or_default();
        }

        slices.insert(row_key, matched);
    }

    slices
}

/// Exact equality, except that a multi-valued side matches if any of its
/// elements matches.
fn values_match(bound: &Value, cell: &Value) -> bool {
    match (bound, cell) {
        (Value::Array(elements), _) => elements.iter().any(|element| values_match(element, cell)),
        (_, Value::Array(elements)) => elements.iter().any(|element| bound == element),
        _ => bound == cell,
    }
}
