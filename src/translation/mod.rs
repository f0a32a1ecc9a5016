use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::{Arc, PoisonError, RwLock};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

mod define;
mod parsers;
mod scanner;

pub use define::{Attributes, render_defines};

use crate::argument::{ArgumentRegistry, Encoder};
use crate::binding::Binding;
use crate::driver::NativeStatement;
use crate::error::SqlPipelineError;
use scanner::{BlockComments, ScanMode, TokenKind, tokenize};

/// Native placeholder syntax written in place of each marker.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderStyle {
    /// Anonymous `?` placeholders.
    #[default]
    Question,
    /// SQLite-style numbered placeholders like `?1`.
    Sqlite,
    /// PostgreSQL-style placeholders like `$1`.
    Postgres,
}

impl PlaceholderStyle {
    /// Block comments nest only in PostgreSQL.
    fn block_comments(self) -> BlockComments {
        match self {
            PlaceholderStyle::Postgres => BlockComments::Nested,
            PlaceholderStyle::Question | PlaceholderStyle::Sqlite => BlockComments::Flat,
        }
    }

    fn write_placeholder(self, out: &mut String, number: usize) {
        match self {
            PlaceholderStyle::Question => out.push('?'),
            PlaceholderStyle::Sqlite => {
                let _ = write!(out, "?{number}");
            }
            PlaceholderStyle::Postgres => {
                let _ = write!(out, "${number}");
            }
        }
    }
}

/// One native placeholder in a rewritten statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    /// A bare `?` marker; `ordinal` counts the positional markers before it.
    Positional { ordinal: usize },
    /// A `:name` marker.
    Named(Arc<str>),
}

/// Native SQL plus the ordered slots its placeholders stand for.
///
/// ```rust
/// use sql_pipeline::prelude::*;
///
/// let plan = RewritePlan::parse("select * from t where a = :x and b = ?", PlaceholderStyle::Postgres)?;
/// assert_eq!(plan.sql(), "select * from t where a = $1 and b = $2");
/// assert_eq!(plan.slots().len(), 2);
/// # Ok::<(), SqlPipelineError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewritePlan {
    sql: String,
    slots: Vec<Slot>,
}

impl RewritePlan {
    /// Tokenize `template` and replace every marker with a `style` placeholder.
    ///
    /// # Errors
    ///
    /// Returns `SqlPipelineError::MalformedTemplate` if the template has an unterminated quote,
    /// comment, or dollar-quoted block.
    pub fn parse(template: &str, style: PlaceholderStyle) -> Result<Self, SqlPipelineError> {
        let tokens = tokenize(template, ScanMode::Markers, style.block_comments())?;
        let mut sql = String::with_capacity(template.len());
        let mut slots = Vec::new();
        let mut positional = 0;

        for token in tokens {
            match token.kind {
                TokenKind::Named => {
                    slots.push(Slot::Named(Arc::from(token.text)));
                    style.write_placeholder(&mut sql, slots.len());
                }
                TokenKind::Positional => {
                    slots.push(Slot::Positional {
                        ordinal: positional,
                    });
                    positional += 1;
                    style.write_placeholder(&mut sql, slots.len());
                }
                TokenKind::Literal
                | TokenKind::Quoted
                | TokenKind::DoubleQuoted
                | TokenKind::DollarQuoted
                | TokenKind::Comment
                | TokenKind::Escaped => sql.push_str(token.text),
            }
        }

        Ok(Self { sql, slots })
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Resolve an encoder for every slot, then write them into `stmt` at 1-based positions.
    ///
    /// Positional slots take the argument bound at their positional ordinal. Named slots try,
    /// in order, the argument bound under that name, each finder of `binding`, and the argument
    /// bound positionally at the slot's index among all slots.
    ///
    /// # Errors
    ///
    /// Returns `SqlPipelineError::UnresolvedParameter` for the first slot with no argument,
    /// `SqlPipelineError::SuperfluousBindings` when arguments go unused and `allow_unused` is
    /// false, or whatever the encoders raise while writing.
    pub fn bind(
        &self,
        binding: &Binding,
        args: &ArgumentRegistry,
        stmt: &mut dyn NativeStatement,
        allow_unused: bool,
    ) -> Result<(), SqlPipelineError> {
        let mut used_names: HashSet<&str> = HashSet::new();
        let mut used_positions: HashSet<usize> = HashSet::new();
        let mut encoders: Vec<Arc<dyn Encoder>> = Vec::with_capacity(self.slots.len());

        for (index, slot) in self.slots.iter().enumerate() {
            let encoder = match slot {
                Slot::Positional { ordinal } => {
                    used_positions.insert(*ordinal);
                    binding.find_for_position(*ordinal).ok_or(
                        SqlPipelineError::UnresolvedParameter {
                            name: None,
                            position: *ordinal,
                        },
                    )?
                }
                Slot::Named(name) => {
                    if binding.has_named(name) {
                        used_names.insert(name.as_ref());
                    }
                    match binding.find_for_name(name, args)? {
                        Some(encoder) => encoder,
                        None => {
                            used_positions.insert(index);
                            binding.find_for_position(index).ok_or_else(|| {
                                SqlPipelineError::UnresolvedParameter {
                                    name: Some(name.to_string()),
                                    position: index,
                                }
                            })?
                        }
                    }
                }
            };
            encoders.push(encoder);
        }

        if !allow_unused {
            let mut unused: Vec<String> = binding
                .named_names()
                .filter(|name| !used_names.contains(name))
                .map(|name| format!(":{name}"))
                .collect();
            unused.sort();
            unused.extend(
                binding
                    .positions()
                    .filter(|p| !used_positions.contains(p))
                    .map(|p| format!("#{p}")),
            );
            if !unused.is_empty() {
                return Err(SqlPipelineError::SuperfluousBindings(unused));
            }
        }

        for (index, encoder) in encoders.iter().enumerate() {
            encoder.apply(index + 1, stmt)?;
        }
        Ok(())
    }
}

enum CachedTemplate {
    Static(Arc<RewritePlan>),
    /// Contains define tokens; rendered and parsed on every execution.
    Dynamic,
}

/// Rewrites templates into native SQL, caching plans by exact template text.
pub struct SqlRewriter {
    style: PlaceholderStyle,
    capacity: usize,
    cache: RwLock<HashMap<String, CachedTemplate>>,
}

impl std::fmt::Debug for SqlRewriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlRewriter")
            .field("style", &self.style)
            .field("capacity", &self.capacity)
            .field("cached", &self.cached_templates())
            .finish()
    }
}

impl SqlRewriter {
    #[must_use]
    pub fn new(style: PlaceholderStyle, capacity: usize) -> Self {
        Self {
            style,
            capacity: capacity.max(1),
            cache: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn style(&self) -> PlaceholderStyle {
        self.style
    }

    /// Number of templates currently remembered.
    #[must_use]
    pub fn cached_templates(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Render defines from `attributes`, then rewrite markers.
    ///
    /// Templates without define tokens are parsed once and served from the cache afterwards.
    ///
    /// # Errors
    ///
    /// Returns `SqlPipelineError::UndefinedAttribute` for a define with no attribute and
    /// `SqlPipelineError::MalformedTemplate` when tokenizing fails.
    pub fn rewrite(
        &self,
        template: &str,
        attributes: &Attributes,
    ) -> Result<Arc<RewritePlan>, SqlPipelineError> {
        let cached = {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            match cache.get(template) {
                Some(CachedTemplate::Static(plan)) => Some(Some(Arc::clone(plan))),
                Some(CachedTemplate::Dynamic) => Some(None),
                None => None,
            }
        };

        match cached {
            Some(Some(plan)) => {
                trace!(template, "rewrite cache hit");
                Ok(plan)
            }
            Some(None) => self.render_and_parse(template, attributes),
            None => {
                if define::has_defines(template, self.style)? {
                    self.remember(template, CachedTemplate::Dynamic);
                    return self.render_and_parse(template, attributes);
                }
                let plan = Arc::new(RewritePlan::parse(template, self.style)?);
                debug!(sql = %plan.sql(), slots = plan.slots().len(), "rewrote template");
                self.remember(template, CachedTemplate::Static(Arc::clone(&plan)));
                Ok(plan)
            }
        }
    }

    fn render_and_parse(
        &self,
        template: &str,
        attributes: &Attributes,
    ) -> Result<Arc<RewritePlan>, SqlPipelineError> {
        let rendered = render_defines(template, attributes, self.style)?;
        let plan = RewritePlan::parse(&rendered, self.style)?;
        debug!(sql = %plan.sql(), slots = plan.slots().len(), "rewrote rendered template");
        Ok(Arc::new(plan))
    }

    fn remember(&self, template: &str, entry: CachedTemplate) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if cache.len() >= self.capacity && !cache.contains_key(template) {
            cache.clear();
        }
        cache.insert(template.to_string(), entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn plan(sql: &str) -> RewritePlan {
        RewritePlan::parse(sql, PlaceholderStyle::Question).unwrap()
    }

    #[test]
    fn comment_nesting_follows_dialect() {
        let sql = "/* /* */ select :a";
        let p = RewritePlan::parse(sql, PlaceholderStyle::Sqlite).unwrap();
        assert_eq!(p.sql(), "/* /* */ select ?1");
        assert_eq!(p.slots().len(), 1);

        let err = RewritePlan::parse(sql, PlaceholderStyle::Postgres).unwrap_err();
        assert!(matches!(err, SqlPipelineError::MalformedTemplate { .. }));
    }

    #[test]
    fn markerless_templates_are_fixed_points() {
        for sql in [
            "select 1",
            "select ':a', \"?\" from t -- :b",
            "select x::text from t /* ? */",
            "",
        ] {
            let p = plan(sql);
            assert_eq!(p.sql(), sql);
            assert!(p.slots().is_empty());
        }
    }

    #[test]
    fn positional_markers_keep_order() {
        let p = RewritePlan::parse("insert into t values (?, ?, ?)", PlaceholderStyle::Sqlite)
            .unwrap();
        assert_eq!(p.sql(), "insert into t values (?1, ?2, ?3)");
        assert_eq!(
            p.slots(),
            &[
                Slot::Positional { ordinal: 0 },
                Slot::Positional { ordinal: 1 },
                Slot::Positional { ordinal: 2 },
            ]
        );
    }

    #[test]
    fn repeated_name_yields_two_slots() {
        let p = plan("select * from t where a = :x and b = :x");
        assert_eq!(p.sql(), "select * from t where a = ? and b = ?");
        assert_eq!(
            p.slots(),
            &[Slot::Named(Arc::from("x")), Slot::Named(Arc::from("x"))]
        );
    }

    #[test]
    fn escapes_are_stripped() {
        let p = plan(r"select '\:a', \:b, \? from t where c = :c");
        assert_eq!(p.sql(), r"select '\:a', :b, ? from t where c = ?");
        assert_eq!(p.slots().len(), 1);
    }

    #[test]
    fn dotted_names_are_single_markers() {
        let p = RewritePlan::parse("select :user.name, :id.", PlaceholderStyle::Postgres).unwrap();
        assert_eq!(p.sql(), "select $1, $2.");
        assert_eq!(p.slots()[0], Slot::Named(Arc::from("user.name")));
        assert_eq!(p.slots()[1], Slot::Named(Arc::from("id")));
    }

    #[test]
    fn malformed_template_is_reported() {
        let err = RewritePlan::parse("select 'oops", PlaceholderStyle::Question).unwrap_err();
        assert!(matches!(
            err,
            SqlPipelineError::MalformedTemplate { position: 7, .. }
        ));
    }

    #[test]
    fn cache_serves_static_templates() {
        let rewriter = SqlRewriter::new(PlaceholderStyle::Question, 10);
        let a = rewriter.rewrite("select :a", &Attributes::new()).unwrap();
        let b = rewriter.rewrite("select :a", &Attributes::new()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(rewriter.cached_templates(), 1);
    }

    #[test]
    fn define_templates_render_each_time() {
        let rewriter = SqlRewriter::new(PlaceholderStyle::Question, 10);
        let mut attrs = Attributes::new();
        attrs.insert("t".into(), Value::Text("a".into()));
        let first = rewriter.rewrite("select * from <t> where id = :id", &attrs).unwrap();
        attrs.insert("t".into(), Value::Text("b".into()));
        let second = rewriter.rewrite("select * from <t> where id = :id", &attrs).unwrap();
        assert_eq!(first.sql(), "select * from a where id = ?");
        assert_eq!(second.sql(), "select * from b where id = ?");

        let err = rewriter
            .rewrite("select * from <t> where id = :id", &Attributes::new())
            .unwrap_err();
        assert!(matches!(err, SqlPipelineError::UndefinedAttribute(_)));
    }

    #[test]
    fn full_cache_is_reset() {
        let rewriter = SqlRewriter::new(PlaceholderStyle::Question, 2);
        for sql in ["select 1", "select 2", "select 3"] {
            rewriter.rewrite(sql, &Attributes::new()).unwrap();
        }
        assert_eq!(rewriter.cached_templates(), 1);
    }
}
