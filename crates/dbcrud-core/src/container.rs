//! SQL container: assembles a dialect-correct, validated statement string
//! plus its positional/named parameter list, with a bounded cache for the
//! hot shapes (`IN (...)` clauses of varying arity) so repeated gateway
//! calls don't re-render the same template every time.
//!
//! Grounded on the teacher's `query::builder::QueryBuilder`, generalized
//! from a single Postgres `$n` form to any [`crate::dialect::Dialect`] and
//! given a parameter-naming contract (`w{n}` where clause, `i{n}` insert,
//! `v{n}` values, `s{n}` set, `j{n}` join, `p{n}` positional batch) so a
//! rendered template string alone fully determines its parameter order.

use crate::dialect::Dialect;
use crate::value::{SemanticType, SqlValue};
use dashmap::DashMap;
use dbcrud_common::{CrudError, Result};
use std::sync::Arc;

/// A named, ordered parameter bound to a container. Carries its semantic
/// type alongside the value so a driver binding layer can pick the right
/// typed bind (and the right flavor of SQL NULL) without re-deriving it
/// from the value alone.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub semantic_type: SemanticType,
    pub value: SqlValue,
}

impl Parameter {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType, value: SqlValue) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            value,
        }
    }
}

/// A fully-rendered statement and its parameters, ready to hand to a driver.
///
/// Doubles as an incremental builder: [`SqlContainer::empty`] plus
/// [`SqlContainer::push_where`]/[`SqlContainer::push_param`] is how the
/// table gateway assembles a `WHERE` clause, enforcing the "prefix emitted
/// exactly once" contract (`\n WHERE ` on the first predicate, `\n AND `
/// after) without every caller re-deriving it.
#[derive(Debug, Clone, Default)]
pub struct SqlContainer {
    pub sql: String,
    pub parameters: Vec<Parameter>,
    where_appended: bool,
}

impl SqlContainer {
    pub fn new(sql: impl Into<String>, parameters: Vec<Parameter>) -> Self {
        Self {
            sql: sql.into(),
            parameters,
            where_appended: false,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn values(&self) -> Vec<&SqlValue> {
        self.parameters.iter().map(|p| &p.value).collect()
    }

    pub fn push_sql(&mut self, fragment: &str) -> &mut Self {
        self.sql.push_str(fragment);
        self
    }

    pub fn push_param(&mut self, name: impl Into<String>, semantic_type: SemanticType, value: SqlValue) -> &mut Self {
        self.parameters.push(Parameter::new(name, semantic_type, value));
        self
    }

    /// True once the first `WHERE` predicate has been appended to this container.
    pub fn has_where_appended(&self) -> bool {
        self.where_appended
    }

    /// Appends one predicate, emitting the `\n WHERE `/`\n AND ` prefix
    /// exactly once per container regardless of how many predicates are added.
    pub fn push_where(&mut self, predicate: &str) -> &mut Self {
        if self.where_appended {
            self.sql.push_str("\n AND ");
        } else {
            self.sql.push_str("\n WHERE ");
            self.where_appended = true;
        }
        self.sql.push_str(predicate);
        self
    }

    /// Compares the container's current parameter count against the
    /// dialect's limit, failing fast with `TooManyParameters` before a
    /// round-trip rather than letting the driver reject an oversized statement.
    pub fn check_parameter_budget(&self, dialect: &dyn Dialect) -> Result<()> {
        let limit = dialect.max_parameters();
        let actual = self.parameters.len();
        if actual > limit {
            return Err(CrudError::TooManyParameters { limit, actual });
        }
        Ok(())
    }
}

/// Rounds `n` up to the next power of two (minimum 1), used to bucket
/// variable-arity `IN (...)` clauses so `IN (?, ?, ?)` and `IN (?, ?)` don't
/// each mint a distinct cache entry per actual row count.
fn bucket_size(n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    n.next_power_of_two()
}

/// Builds `w0, w1, ... w{n-1}` markers for an `IN (...)` clause of bucketed
/// arity, returning the rendered fragment and the bucket size actually used.
fn render_in_clause(dialect: &dyn Dialect, column: &str, start_position: usize, arity: usize) -> (String, usize) {
    let bucketed = bucket_size(arity);
    let markers: Vec<String> = (0..bucketed)
        .map(|i| dialect.make_parameter_marker(&format!("w{}", start_position + i), start_position + i))
        .collect();
    (format!("{column} IN ({})", markers.join(", ")), bucketed)
}

/// A cache entry: the rendered SQL template and the bucket arity it was
/// built for. NULL-padding the bucket's extra slots is the caller's job
/// (e.g. by repeating the last value), so the same template always carries
/// exactly `bucket` bound parameters.
#[derive(Debug, Clone)]
struct CachedTemplate {
    sql: String,
    bucket: usize,
}

/// Bounded, lock-free SQL template cache keyed by `(table, column, bucket)`.
/// Entries never expire individually; the cache caps its total size and
/// evicts arbitrarily once full, which is acceptable because a miss just
/// costs one re-render, not a correctness issue.
pub struct TemplateCache {
    entries: DashMap<(String, String, usize), Arc<CachedTemplate>>,
    max_entries: usize,
}

impl TemplateCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
        }
    }

    /// Returns a rendered `column IN (...)` clause sized to the next power
    /// of two >= `values.len()`, building and caching it on first use.
    pub fn in_clause(
        &self,
        dialect: &dyn Dialect,
        table: &str,
        column: &str,
        start_position: usize,
        values: &[SqlValue],
    ) -> Result<(String, Vec<SqlValue>)> {
        if values.is_empty() {
            return Err(CrudError::Validation(format!(
                "IN clause for '{column}' requires at least one value"
            )));
        }

        let key = (table.to_string(), column.to_string(), bucket_size(values.len()));
        let template = if let Some(cached) = self.entries.get(&key) {
            cached.clone()
        } else {
            let (sql, bucket) = render_in_clause(dialect, column, start_position, values.len());
            let cached = Arc::new(CachedTemplate { sql, bucket });
            if self.entries.len() < self.max_entries {
                self.entries.insert(key, cached.clone());
            }
            cached
        };

        let mut padded = values.to_vec();
        let last = padded.last().cloned().unwrap_or(SqlValue::Null);
        while padded.len() < template.bucket {
            padded.push(last.clone());
        }
        Ok((template.sql.clone(), padded))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TemplateCache {
    fn default() -> Self {
        // Generous enough for a service talking to a handful of tables with
        // a handful of filterable columns each; still bounded so a
        // pathological caller can't grow this without limit.
        Self::new(4096)
    }
}
