// Boundary interfaces to the host view system - rows, registries, handles

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Position of a row within its parent result set. Row keys are assigned
/// in result order and identify per-row result slices during a render pass.
pub type RowKey = usize;

/// One row of a view result: a map from column alias to cell value.
/// Cells are scalars or, for multi-valued fields, arrays of scalars.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Row {
    key: RowKey,
    values: serde_json::Map<String, Value>,
}

impl Row {
    pub fn new(key: RowKey, values: serde_json::Map<String, Value>) -> Self {
        Row { key, values }
    }

    pub fn key(&self) -> RowKey {
        self.key
    }

    pub fn value_at(&self, alias: &str) -> Option<&Value> {
        self.values.get(alias)
    }

    pub fn values(&self) -> &serde_json::Map<String, Value> {
        &self.values
    }
}

/// Page configuration of a view display.
///
/// `offset` is a page index into the result set, not a row offset: a pager
/// of `items_per_page: 10, offset: 1` keeps rows 10-19. `items_per_page: 0`
/// disables limiting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PagerConfig {
    #[serde(default)]
    pub items_per_page: u32,
    #[serde(default)]
    pub offset: u32,
}

/// Field handlers of the parent view, keyed by field identifier.
///
/// The raw and rendered accessors return the value the handler most
/// recently produced. Rendered values in particular are a per-field cache
/// that is only updated when that field renders, so reading one before the
/// field has rendered for the current row returns the previous row's
/// markup. Token resolution depends on this behavior; implementations must
/// not recompute on read.
pub trait FieldRegistry {
    fn contains(&self, key: &str) -> bool;

    /// Last raw value computed for this field on the given row.
    fn raw_value(&self, key: &str, row: &Row) -> Option<Value>;

    /// Last rendered markup produced for this field, regardless of row.
    fn rendered_value(&self, key: &str) -> Option<Value>;

    /// Backing result column for the field's raw value.
    fn raw_alias(&self, key: &str) -> Option<String>;

    /// Backing result column for the field's rendered value. Falls back to
    /// the raw alias when the field has no separate rendered column.
    fn rendered_alias(&self, key: &str) -> Option<String>;

    /// Primary column of a multi-valued field; sub-values are read at this
    /// alias when reducing list entries.
    fn primary_alias(&self, key: &str) -> Option<String>;

    /// Record the markup a field just produced, updating the rendered cache.
    fn record_rendered(&self, key: &str, markup: &str);
}

/// Positional filter arguments of the parent view, 1-based as written in
/// token text (`!1` is the first argument's input, `%1` its title).
pub trait PositionalArguments {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Human-readable title of the argument at `position` (1-based).
    fn title(&self, position: usize) -> Option<String>;

    /// Raw input value supplied for the argument at `position` (1-based).
    fn raw_input(&self, position: usize) -> Option<Value>;
}

/// The parent view as seen by token resolution: its field handlers and its
/// positional arguments. Borrowed for the duration of one render pass.
pub struct ParentContext<'a> {
    pub fields: &'a dyn FieldRegistry,
    pub arguments: &'a dyn PositionalArguments,
}

/// A loaded view, positioned on a display and ready to execute.
///
/// Handles are single-use per execution: the embed pipeline loads one
/// handle per child invocation (or one per batched pass) and drops it when
/// the output has been produced.
pub trait ViewHandle {
    /// Switch to the given display. Fails if the display does not exist.
    fn set_display(&mut self, display: &str) -> Result<()>;

    /// Whether the current request may execute the given display.
    fn check_access(&self, display: &str) -> bool;

    /// Pager configured on the current display.
    fn pager_config(&self) -> PagerConfig;

    /// Drop the display's own paging so a query fetches every matching row.
    fn disable_paging(&mut self);

    /// Add a `column IN (values)` predicate. The column is treated as a
    /// hidden helper: it participates in the query and the result rows but
    /// is excluded from rendered output.
    fn add_value_filter(&mut self, column: &str, values: &[Value]);

    /// Build and run the view query once, binding `args` to the display's
    /// positional filters in order.
    fn execute(&mut self, args: &[Value]) -> Result<Vec<Row>>;

    /// Render a result set through the current display.
    fn render_rows(&self, rows: &[Row]) -> Result<String>;
}

/// Lookup of views by name, implemented by the host system.
pub trait ViewRegistry {
    type Handle: ViewHandle;

    fn view_by_name(&self, name: &str) -> Option<Self::Handle>;
}
