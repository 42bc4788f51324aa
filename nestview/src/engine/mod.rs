// Reference view engine - YAML view definitions executed against SQLite
//
// The embed pipeline only depends on the boundary traits in `view`; this
// module supplies a working implementation of them so the crate can run
// and be tested end-to-end. Views are SQL queries; sqlparser extracts
// result columns and LIMIT from the text, rusqlite executes the query
// with argument and value-filter predicates applied through a wrapper
// SELECT.

use crate::error::{NestViewError, Result};
use crate::view::{
    FieldRegistry, PagerConfig, PositionalArguments, Row, RowKey, ViewHandle, ViewRegistry,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlparser::ast::{Expr, Select, SelectItem, SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Top-level view configuration parsed from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewSetDefinition {
    #[serde(default)]
    pub views: HashMap<String, ViewDefinition>,
}

/// Definition of a single view: one SQL query plus its displays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub query: String,
    #[serde(default)]
    pub displays: HashMap<String, DisplayDefinition>,
}

/// Definition of a single display of a view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayDefinition {
    /// Page configuration. Falls back to the query's LIMIT when absent.
    #[serde(default)]
    pub pager: Option<PagerConfig>,
    /// Whether the current request may execute this display.
    #[serde(default = "default_access")]
    pub access: bool,
    /// Result columns bound, in order, to positional filter arguments.
    #[serde(default)]
    pub argument_columns: Vec<String>,
    /// Result columns excluded from rendered output.
    #[serde(default)]
    pub excluded_columns: Vec<String>,
}

fn default_access() -> bool {
    true
}

impl Default for DisplayDefinition {
    fn default() -> Self {
        DisplayDefinition {
            pager: None,
            access: true,
            argument_columns: Vec::new(),
            excluded_columns: Vec::new(),
        }
    }
}

/// Parsed metadata for one view definition.
#[derive(Debug, Clone)]
pub struct ParsedView {
    pub name: String,
    /// Canonical SQL with any LIMIT clause removed; paging is applied at
    /// execution time instead.
    base_sql: String,
    /// Column aliases in the result.
    pub columns: Vec<String>,
    /// LIMIT from the query text, seeding the pager of displays that do
    /// not configure one.
    pub default_limit: Option<u64>,
    displays: HashMap<String, DisplayDefinition>,
}

/// The view engine: named views over one SQLite connection.
pub struct SqlViewEngine {
    conn: Rc<Connection>,
    views: HashMap<String, ParsedView>,
}

impl SqlViewEngine {
    /// Build an engine from a connection and YAML view definitions.
    pub fn new(conn: Connection, yaml: &str) -> Result<Self> {
        let set: ViewSetDefinition = serde_yaml::from_str(yaml)?;
        let mut views = HashMap::new();
        for (name, definition) in set.views {
            let parsed = parse_view_definition(&name, definition)?;
            views.insert(name, parsed);
        }
        Ok(SqlViewEngine {
            conn: Rc::new(conn),
            views,
        })
    }

    pub fn parsed_view(&self, name: &str) -> Option<&ParsedView> {
        self.views.get(name)
    }

    /// Execute a view's default display directly. Convenience for hosts
    /// producing a parent result set.
    pub fn execute_view(&self, name: &str, args: &[Value]) -> Result<Vec<Row>> {
        let mut handle = self
            .view_by_name(name)
            .ok_or_else(|| NestViewError::ViewNotFound(name.to_string()))?;
        handle.execute(args)
    }
}

impl ViewRegistry for SqlViewEngine {
    type Handle = SqlView;

    fn view_by_name(&self, name: &str) -> Option<SqlView> {
        self.views.get(name).map(|view| {
            let display_def = view.displays.get("default").cloned().unwrap_or_default();
            SqlView {
                conn: Rc::clone(&self.conn),
                view: view.clone(),
                display: "default".to_string(),
                display_def,
                paging_disabled: false,
                value_filters: Vec::new(),
                hidden_columns: Vec::new(),
            }
        })
    }
}

/// A view loaded from the engine, positioned on one display.
pub struct SqlView {
    conn: Rc<Connection>,
    view: ParsedView,
    display: String,
    display_def: DisplayDefinition,
    paging_disabled: bool,
    value_filters: Vec<(String, Vec<Value>)>,
    hidden_columns: Vec<String>,
}

impl SqlView {
    fn build_sql(&self, args: &[Value]) -> (String, Vec<rusqlite::types::Value>) {
        let mut sql = format!("SELECT * FROM ({}) AS base", self.view.base_sql);
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<rusqlite::types::Value> = Vec::new();

        for (column, value) in self.display_def.argument_columns.iter().zip(args) {
            conditions.push(format!("base.{} = ?", quote_ident(column)));
            params.push(to_sql_value(value));
        }
        if args.len() > self.display_def.argument_columns.len() {
            log::warn!(
                "view {}/{}: {} argument(s) supplied, display accepts {}; extra arguments ignored",
                self.view.name,
                self.display,
                args.len(),
                self.display_def.argument_columns.len()
            );
        }

        for (column, values) in &self.value_filters {
            if values.is_empty() {
                // IN over an empty set matches nothing.
                conditions.push("0 = 1".to_string());
                continue;
            }
            let placeholders = vec!["?"; values.len()].join(", ");
            conditions.push(format!("base.{} IN ({})", quote_ident(column), placeholders));
            params.extend(values.iter().map(to_sql_value));
        }

        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        if !self.paging_disabled {
            let pager = self.pager_config();
            if pager.items_per_page > 0 {
                sql.push_str(&format!(
                    " LIMIT {} OFFSET {}",
                    pager.items_per_page,
                    pager.offset * pager.items_per_page
                ));
            }
        }

        (sql, params)
    }

    fn visible_columns(&self, row: &Row) -> Vec<String> {
        let is_wildcard = self.view.columns.iter().any(|c| c == "*");
        let candidates: Vec<String> = if is_wildcard {
            row.values().keys().cloned().collect()
        } else {
            self.view.columns.clone()
        };
        candidates
            .into_iter()
            .filter(|c| !self.display_def.excluded_columns.contains(c))
            .filter(|c| !self.hidden_columns.contains(c))
            .collect()
    }
}

impl ViewHandle for SqlView {
    fn set_display(&mut self, display: &str) -> Result<()> {
        match self.view.displays.get(display) {
            Some(definition) => {
                self.display = display.to_string();
                self.display_def = definition.clone();
                Ok(())
            }
            None => Err(NestViewError::DisplayNotFound {
                view: self.view.name.clone(),
                display: display.to_string(),
            }),
        }
    }

    fn check_access(&self, display: &str) -> bool {
        self.view
            .displays
            .get(display)
            .map(|d| d.access)
            .unwrap_or(false)
    }

    fn pager_config(&self) -> PagerConfig {
        // The display's own pager wins; otherwise the query LIMIT. Reports
        // the configured pager even after disable_paging so per-row
        // limiting can still honor it.
        self.display_def.pager.unwrap_or(PagerConfig {
            items_per_page: self.view.default_limit.unwrap_or(0) as u32,
            offset: 0,
        })
    }

    fn disable_paging(&mut self) {
        self.paging_disabled = true;
    }

    fn add_value_filter(&mut self, column: &str, values: &[Value]) {
        self.value_filters.push((column.to_string(), values.to_vec()));
        if !self.hidden_columns.iter().any(|c| c == column) {
            self.hidden_columns.push(column.to_string());
        }
    }

    fn execute(&mut self, args: &[Value]) -> Result<Vec<Row>> {
        let (sql, params) = self.build_sql(args);
        let mut stmt = self.conn.prepare(&sql)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let mut rows = Vec::new();
        let mut raw = stmt.query(rusqlite::params_from_iter(params))?;
        let mut key: RowKey = 0;
        while let Some(sql_row) = raw.next()? {
            let mut values = serde_json::Map::new();
            for (i, name) in column_names.iter().enumerate() {
                values.insert(name.clone(), cell_to_value(sql_row.get_ref(i)?));
            }
            rows.push(Row::new(key, values));
            key += 1;
        }
        Ok(rows)
    }

    fn render_rows(&self, rows: &[Row]) -> Result<String> {
        if rows.is_empty() {
            return Ok(String::new());
        }
        let output: Vec<Value> = rows
            .iter()
            .map(|row| {
                let mut map = serde_json::Map::new();
                for column in self.visible_columns(row) {
                    if let Some(value) = row.value_at(&column) {
                        map.insert(column, value.clone());
                    }
                }
                Value::Object(map)
            })
            .collect();
        Ok(serde_yaml::to_string(&output)?)
    }
}

/// Parse one view definition: extract result columns and LIMIT, strip the
/// LIMIT from the canonical SQL, make sure a default display exists.
fn parse_view_definition(name: &str, definition: ViewDefinition) -> Result<ParsedView> {
    let dialect = GenericDialect {};
    let mut statements = Parser::parse_sql(&dialect, definition.query.trim())
        .map_err(|e| NestViewError::SqlParse(format!("View '{name}': {e}")))?;

    if statements.is_empty() {
        return Err(NestViewError::SqlParse(format!(
            "View '{name}': no SQL statements found"
        )));
    }

    let mut stmt = statements.remove(0);
    let mut columns = Vec::new();
    let mut default_limit = None;

    match &mut stmt {
        Statement::Query(query) => {
            if let Some(Expr::Value(sqlparser::ast::Value::Number(n, _))) = &query.limit {
                default_limit = n.parse::<u64>().ok();
            }
            query.limit = None;
            if let SetExpr::Select(select) = query.body.as_ref() {
                extract_columns(select, &mut columns);
            }
        }
        _ => {
            return Err(NestViewError::SqlParse(format!(
                "View '{name}': not a SELECT query"
            )));
        }
    }

    let base_sql = stmt.to_string();
    let mut displays = definition.displays;
    displays.entry("default".to_string()).or_default();

    Ok(ParsedView {
        name: name.to_string(),
        base_sql,
        columns,
        default_limit,
        displays,
    })
}

/// Extract column aliases from a SELECT clause.
fn extract_columns(select: &Select, columns: &mut Vec<String>) {
    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(expr) => columns.push(column_name(expr)),
            SelectItem::ExprWithAlias { alias, .. } => columns.push(alias.value.clone()),
            SelectItem::Wildcard(_) => columns.push("*".to_string()),
            _ => {}
        }
    }
}

fn column_name(expr: &Expr) -> String {
    match expr {
        Expr::Identifier(ident) => ident.value.clone(),
        Expr::CompoundIdentifier(parts) => {
            parts.last().map(|p| p.value.clone()).unwrap_or_default()
        }
        _ => format!("{expr}"),
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn to_sql_value(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as SqlValue;
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                SqlValue::Real(f)
            } else {
                SqlValue::Null
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn cell_to_value(cell: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).to_string()),
        ValueRef::Blob(_) => Value::Null,
    }
}

// ── Parent-side registries ─────────────────────────────────────

/// One field handler entry of the parent view.
#[derive(Debug, Clone)]
pub struct FieldEntry {
    pub key: String,
    pub raw_alias: String,
    pub rendered_alias: Option<String>,
    pub primary_alias: Option<String>,
}

/// Concrete `FieldRegistry`: ordered field entries plus the last-rendered
/// cache. The cache returns whatever markup was most recently recorded for
/// a field, even when that render belongs to an earlier row; token
/// resolution relies on exactly this behavior.
pub struct FieldTable {
    entries: Vec<FieldEntry>,
    rendered_cache: RefCell<HashMap<String, String>>,
}

impl FieldTable {
    pub fn new() -> Self {
        FieldTable {
            entries: Vec::new(),
            rendered_cache: RefCell::new(HashMap::new()),
        }
    }

    /// Add a field backed by a single result column.
    pub fn add(&mut self, key: &str, raw_alias: &str) {
        self.entries.push(FieldEntry {
            key: key.to_string(),
            raw_alias: raw_alias.to_string(),
            rendered_alias: None,
            primary_alias: None,
        });
    }

    /// Add a multi-valued field whose list entries carry their value at
    /// `primary_alias`.
    pub fn add_with_primary(&mut self, key: &str, raw_alias: &str, primary_alias: &str) {
        self.entries.push(FieldEntry {
            key: key.to_string(),
            raw_alias: raw_alias.to_string(),
            rendered_alias: None,
            primary_alias: Some(primary_alias.to_string()),
        });
    }

    pub fn add_entry(&mut self, entry: FieldEntry) {
        self.entries.push(entry);
    }

    fn entry(&self, key: &str) -> Option<&FieldEntry> {
        self.entries.iter().find(|e| e.key == key)
    }
}

impl Default for FieldTable {
    fn default() -> Self {
        FieldTable::new()
    }
}

impl FieldRegistry for FieldTable {
    fn contains(&self, key: &str) -> bool {
        self.entry(key).is_some()
    }

    fn raw_value(&self, key: &str, row: &Row) -> Option<Value> {
        let entry = self.entry(key)?;
        row.value_at(&entry.raw_alias).cloned()
    }

    fn rendered_value(&self, key: &str) -> Option<Value> {
        self.rendered_cache
            .borrow()
            .get(key)
            .cloned()
            .map(Value::String)
    }

    fn raw_alias(&self, key: &str) -> Option<String> {
        self.entry(key).map(|e| e.raw_alias.clone())
    }

    fn rendered_alias(&self, key: &str) -> Option<String> {
        let entry = self.entry(key)?;
        Some(
            entry
                .rendered_alias
                .clone()
                .unwrap_or_else(|| entry.raw_alias.clone()),
        )
    }

    fn primary_alias(&self, key: &str) -> Option<String> {
        let entry = self.entry(key)?;
        Some(
            entry
                .primary_alias
                .clone()
                .unwrap_or_else(|| entry.raw_alias.clone()),
        )
    }

    fn record_rendered(&self, key: &str, markup: &str) {
        self.rendered_cache
            .borrow_mut()
            .insert(key.to_string(), markup.to_string());
    }
}

/// One positional argument of the parent view.
#[derive(Debug, Clone)]
pub struct ArgumentEntry {
    pub title: String,
    pub raw_input: Value,
}

/// Concrete `PositionalArguments` backed by an ordered list.
pub struct ArgumentTable {
    entries: Vec<ArgumentEntry>,
}

impl ArgumentTable {
    pub fn new() -> Self {
        ArgumentTable {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, title: &str, raw_input: Value) {
        self.entries.push(ArgumentEntry {
            title: title.to_string(),
            raw_input,
        });
    }
}

impl Default for ArgumentTable {
    fn default() -> Self {
        ArgumentTable::new()
    }
}

impl PositionalArguments for ArgumentTable {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn title(&self, position: usize) -> Option<String> {
        let index = position.checked_sub(1)?;
        self.entries.get(index).map(|e| e.title.clone())
    }

    fn raw_input(&self, position: usize) -> Option<Value> {
        let index = position.checked_sub(1)?;
        self.entries.get(index).map(|e| e.raw_input.clone())
    }
}
