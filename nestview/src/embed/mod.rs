// Render orchestration for one embedded child view field
//
// Two paths produce a row's output. The per-row path resolves the token
// string against the row and executes the child view with the resulting
// arguments. The aggregated path consumes the slice precomputed by
// `prepare_aggregation` and never queries at render time.

use crate::aggregate::{collect_bindings, execute_batched, partition_rows, AggregationState};
use crate::config::ChildEmbedConfig;
use crate::error::{NestViewError, Result};
use crate::guard::RecursionGuard;
use crate::token::{build_arguments, parse_token, split_tokens, TokenDescriptor};
use crate::view::{ParentContext, Row, ViewHandle, ViewRegistry};

/// Rendered in place of a child view that is already mid-render.
pub const RECURSION_NOTICE: &str = "Recursion detected, stopping.";

/// A field of the parent display that embeds a child view.
pub struct ViewField {
    key: String,
    config: ChildEmbedConfig,
}

impl ViewField {
    /// `key` is this field's identifier in the parent's field registry;
    /// its rendered output is recorded there under that key.
    pub fn new(key: impl Into<String>, config: ChildEmbedConfig) -> Self {
        ViewField {
            key: key.into(),
            config,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &ChildEmbedConfig {
        &self.config
    }

    /// Run the batching pre-pass: collect argument values across all
    /// parent rows, execute the single batched child query and partition
    /// the result per row. Call once per render pass, before any row
    /// renders. A missing or inaccessible child degrades to an empty
    /// state (every row renders as empty); a failing child query is an
    /// error.
    pub fn prepare_aggregation<R: ViewRegistry>(
        &self,
        registry: &R,
        rows: &[Row],
        parent: &ParentContext,
    ) -> Result<AggregationState<R::Handle>> {
        if !self.config.aggregate || self.config.arguments.trim().is_empty() {
            return Ok(AggregationState::empty());
        }

        let tokens: Vec<TokenDescriptor> = split_tokens(&self.config.arguments)
            .iter()
            .map(|piece| parse_token(piece))
            .collect();
        let bindings = collect_bindings(&tokens, rows, parent);
        if bindings.is_empty() {
            // Nothing to filter on. Do not fall back to per-row queries -
            // the field is empty for every row this pass.
            log::debug!(
                "no argument bindings for {}/{}; aggregation yields empty output",
                self.config.view,
                self.config.display
            );
            return Ok(AggregationState::empty());
        }

        match execute_batched(registry, &self.config.view, &self.config.display, &bindings) {
            Ok((child, aggregated)) => {
                let pager = child.pager_config();
                let slices = partition_rows(&aggregated, &bindings, pager);
                Ok(AggregationState::new(bindings, slices, child))
            }
            Err(
                err @ (NestViewError::ViewNotFound(_)
                | NestViewError::DisplayNotFound { .. }
                | NestViewError::AccessDenied { .. }),
            ) => {
                log::warn!("batched child query skipped: {err}");
                Ok(AggregationState::empty())
            }
            Err(other) => Err(other),
        }
    }

    /// Render this field for one parent row.
    ///
    /// Returns empty output when the child is missing or inaccessible,
    /// the recursion notice when the (view, display) pair is already
    /// mid-render, and `Err` only when the child query itself fails.
    pub fn render_field<R: ViewRegistry>(
        &self,
        registry: &R,
        row: &Row,
        parent: &ParentContext,
        guard: &RecursionGuard,
        aggregation: Option<&AggregationState<R::Handle>>,
    ) -> Result<String> {
        if self.config.view.is_empty() {
            return Ok(String::new());
        }

        let Some(_held) = guard.try_enter(&self.config.view, &self.config.display) else {
            return Ok(RECURSION_NOTICE.to_string());
        };

        let output = if self.config.aggregate {
            self.render_slice(row, aggregation)?
        } else {
            self.render_per_row(registry, row, parent)?
        };

        if !output.is_empty() {
            parent.fields.record_rendered(&self.key, &output);
        }
        Ok(output)
    }

    /// Per-row path: one child execution with this row's arguments.
    fn render_per_row<R: ViewRegistry>(
        &self,
        registry: &R,
        row: &Row,
        parent: &ParentContext,
    ) -> Result<String> {
        let args = build_arguments(&self.config.arguments, row, parent);

        let Some(mut child) = registry.view_by_name(&self.config.view) else {
            log::warn!("child view {} not found, rendering empty", self.config.view);
            return Ok(String::new());
        };
        if !child.check_access(&self.config.display) {
            return Ok(String::new());
        }
        if let Err(err) = child.set_display(&self.config.display) {
            match err {
                NestViewError::DisplayNotFound { .. } => {
                    log::warn!("{err}, rendering empty");
                    return Ok(String::new());
                }
                other => return Err(other),
            }
        }

        let rows = child.execute(&args)?;
        if rows.is_empty() && self.config.hide_empty {
            return Ok(String::new());
        }
        child.render_rows(&rows)
    }

    /// Aggregated path: consume the precomputed slice, no querying.
    fn render_slice<H: ViewHandle>(
        &self,
        row: &Row,
        aggregation: Option<&AggregationState<H>>,
    ) -> Result<String> {
        let Some(state) = aggregation else {
            return Ok(String::new());
        };
        let Some(child) = state.child() else {
            return Ok(String::new());
        };
        let slice = state.slice(row.key()).unwrap_or(&[]);
        if slice.is_empty() && self.config.hide_empty {
            return Ok(String::new());
        }
        child.render_rows(slice)
    }
}
