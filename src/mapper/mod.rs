use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::trace;

use crate::config::{EngineConfig, EnumStrategy};
use crate::error::SqlPipelineError;
use crate::results::DbRow;
use crate::types::{RowValues, SqlType, Value};

mod builtin;

pub use builtin::{builtin_column_factories, builtin_row_factories};
pub(crate) use builtin::DB_ROW;

/// Decodes one column of a row.
pub trait ColumnMapper: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the column is missing or cannot be converted.
    fn map(&self, row: &DbRow, index: usize) -> Result<Value, SqlPipelineError>;
}

impl<F> ColumnMapper for F
where
    F: Fn(&DbRow, usize) -> Result<Value, SqlPipelineError> + Send + Sync,
{
    fn map(&self, row: &DbRow, index: usize) -> Result<Value, SqlPipelineError> {
        self(row, index)
    }
}

/// Decodes a whole row.
pub trait RowMapper: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the row cannot be converted.
    fn map(&self, row: &DbRow) -> Result<Value, SqlPipelineError>;
}

impl<F> RowMapper for F
where
    F: Fn(&DbRow) -> Result<Value, SqlPipelineError> + Send + Sync,
{
    fn map(&self, row: &DbRow) -> Result<Value, SqlPipelineError> {
        self(row)
    }
}

pub trait ColumnMapperFactory: Send + Sync {
    /// Column mapper for `ty`, or `None` when this factory does not handle it.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory handles `ty` but cannot build a mapper for it.
    fn build(
        &self,
        ty: &SqlType,
        registry: &MappingRegistry,
    ) -> Result<Option<Arc<dyn ColumnMapper>>, SqlPipelineError>;
}

pub trait RowMapperFactory: Send + Sync {
    /// Row mapper for `ty`, or `None` when this factory does not handle it.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory handles `ty` but cannot build a mapper for it.
    fn build(
        &self,
        ty: &SqlType,
        registry: &MappingRegistry,
    ) -> Result<Option<Arc<dyn RowMapper>>, SqlPipelineError>;
}

fn missing_column(index: usize) -> SqlPipelineError {
    SqlPipelineError::ConversionError(format!("column index {index} is out of range"))
}

/// Column value at `index`, or a conversion error when the row is shorter.
pub(crate) fn column(row: &DbRow, index: usize) -> Result<&RowValues, SqlPipelineError> {
    row.get_by_index(index).ok_or_else(|| missing_column(index))
}

type ColumnFn = dyn Fn(&RowValues) -> Result<Value, SqlPipelineError> + Send + Sync;

/// Column factory for one type, backed by a closure over the raw column value.
pub struct FnColumnMapperFactory {
    ty: SqlType,
    mapper: Arc<FnColumnMapper>,
}

struct FnColumnMapper(Box<ColumnFn>);

impl ColumnMapper for FnColumnMapper {
    fn map(&self, row: &DbRow, index: usize) -> Result<Value, SqlPipelineError> {
        (self.0)(column(row, index)?)
    }
}

impl FnColumnMapperFactory {
    pub fn new<F>(ty: SqlType, f: F) -> Self
    where
        F: Fn(&RowValues) -> Result<Value, SqlPipelineError> + Send + Sync + 'static,
    {
        Self {
            ty,
            mapper: Arc::new(FnColumnMapper(Box::new(f))),
        }
    }
}

impl ColumnMapperFactory for FnColumnMapperFactory {
    fn build(
        &self,
        ty: &SqlType,
        _registry: &MappingRegistry,
    ) -> Result<Option<Arc<dyn ColumnMapper>>, SqlPipelineError> {
        Ok((*ty == self.ty).then(|| Arc::clone(&self.mapper) as Arc<dyn ColumnMapper>))
    }
}

/// Row factory for one type, backed by a closure over the whole row.
pub struct FnRowMapperFactory {
    ty: SqlType,
    mapper: Arc<dyn RowMapper>,
}

impl FnRowMapperFactory {
    pub fn new<F>(ty: SqlType, f: F) -> Self
    where
        F: Fn(&DbRow) -> Result<Value, SqlPipelineError> + Send + Sync + 'static,
    {
        Self {
            ty,
            mapper: Arc::new(f),
        }
    }
}

impl RowMapperFactory for FnRowMapperFactory {
    fn build(
        &self,
        ty: &SqlType,
        _registry: &MappingRegistry,
    ) -> Result<Option<Arc<dyn RowMapper>>, SqlPipelineError> {
        Ok((*ty == self.ty).then(|| Arc::clone(&self.mapper)))
    }
}

/// Row mapper reading only the first column.
pub struct SingleColumnMapper(Arc<dyn ColumnMapper>);

impl SingleColumnMapper {
    #[must_use]
    pub fn new(column: Arc<dyn ColumnMapper>) -> Self {
        Self(column)
    }
}

impl RowMapper for SingleColumnMapper {
    fn map(&self, row: &DbRow) -> Result<Value, SqlPipelineError> {
        self.0.map(row, 0)
    }
}

type RowFactories = Arc<Vec<Arc<dyn RowMapperFactory>>>;
type ColumnFactories = Arc<Vec<Arc<dyn ColumnMapperFactory>>>;

/// Resolved mappers keyed by type, stamped with the registration generation they were built
/// under. Clearing bumps the generation so a resolution that started earlier cannot store its
/// result afterwards.
struct MapperCache<M: ?Sized> {
    generation: u64,
    entries: HashMap<SqlType, Arc<M>>,
}

impl<M: ?Sized> Clone for MapperCache<M> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            entries: self.entries.clone(),
        }
    }
}

impl<M: ?Sized> MapperCache<M> {
    fn new() -> Self {
        Self {
            generation: 0,
            entries: HashMap::new(),
        }
    }
}

fn cached<M: ?Sized>(cache: &RwLock<MapperCache<M>>, ty: &SqlType) -> Result<Arc<M>, u64> {
    let cache = cache.read().unwrap_or_else(PoisonError::into_inner);
    cache.entries.get(ty).map(Arc::clone).ok_or(cache.generation)
}

fn store<M: ?Sized>(
    cache: &RwLock<MapperCache<M>>,
    generation: u64,
    ty: &SqlType,
    mapper: &Arc<M>,
) {
    let mut cache = cache.write().unwrap_or_else(PoisonError::into_inner);
    if cache.generation == generation {
        cache.entries.insert(ty.clone(), Arc::clone(mapper));
    } else {
        trace!(?ty, "registry changed during resolution; not caching");
    }
}

fn invalidate<M: ?Sized>(cache: &RwLock<MapperCache<M>>) {
    let mut cache = cache.write().unwrap_or_else(PoisonError::into_inner);
    cache.generation += 1;
    cache.entries.clear();
}

/// Row and column mapper chains with per-type caches.
///
/// Registration puts the new factory first and drops every cached mapper of that kind; a new
/// column factory also drops cached row mappers, since those may be column adaptations.
pub struct MappingRegistry {
    rows: RwLock<RowFactories>,
    columns: RwLock<ColumnFactories>,
    row_cache: RwLock<MapperCache<dyn RowMapper>>,
    column_cache: RwLock<MapperCache<dyn ColumnMapper>>,
    enum_strategy: EnumStrategy,
    coalesce_null_primitives: bool,
}

impl fmt::Debug for MappingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingRegistry")
            .field("row_factories", &read(&self.rows).len())
            .field("column_factories", &read(&self.columns).len())
            .field("enum_strategy", &self.enum_strategy)
            .field("coalesce_null_primitives", &self.coalesce_null_primitives)
            .finish_non_exhaustive()
    }
}

fn read<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

impl MappingRegistry {
    /// Registry holding the built-in factories.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        let registry = Self::empty(config);
        for factory in builtin_row_factories() {
            registry.register_row_arc(factory);
        }
        for factory in builtin_column_factories() {
            registry.register_column_arc(factory);
        }
        registry
    }

    #[must_use]
    pub fn empty(config: &EngineConfig) -> Self {
        Self {
            rows: RwLock::new(Arc::new(Vec::new())),
            columns: RwLock::new(Arc::new(Vec::new())),
            row_cache: RwLock::new(MapperCache::new()),
            column_cache: RwLock::new(MapperCache::new()),
            enum_strategy: config.enum_strategy,
            coalesce_null_primitives: config.coalesce_null_primitives,
        }
    }

    #[must_use]
    pub fn enum_strategy(&self) -> EnumStrategy {
        self.enum_strategy
    }

    #[must_use]
    pub fn coalesce_null_primitives(&self) -> bool {
        self.coalesce_null_primitives
    }

    pub fn register_row<F: RowMapperFactory + 'static>(&self, factory: F) {
        self.register_row_arc(Arc::new(factory));
    }

    pub fn register_row_arc(&self, factory: Arc<dyn RowMapperFactory>) {
        {
            let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
            Arc::make_mut(&mut *rows).insert(0, factory);
        }
        invalidate(&self.row_cache);
    }

    pub fn register_column<F: ColumnMapperFactory + 'static>(&self, factory: F) {
        self.register_column_arc(Arc::new(factory));
    }

    pub fn register_column_arc(&self, factory: Arc<dyn ColumnMapperFactory>) {
        {
            let mut columns = self
                .columns
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::make_mut(&mut *columns).insert(0, factory);
        }
        invalidate(&self.column_cache);
        invalidate(&self.row_cache);
    }

    /// Independent copy of both factory chains and their caches.
    #[must_use]
    pub fn fork_child(&self) -> Self {
        Self {
            rows: RwLock::new(read(&self.rows)),
            columns: RwLock::new(read(&self.columns)),
            row_cache: RwLock::new(read(&self.row_cache)),
            column_cache: RwLock::new(read(&self.column_cache)),
            enum_strategy: self.enum_strategy,
            coalesce_null_primitives: self.coalesce_null_primitives,
        }
    }

    /// Row mapper for `ty`: the first row factory handling it, else its column mapper applied
    /// to the first column.
    ///
    /// # Errors
    ///
    /// Returns `SqlPipelineError::NoMapper` if neither chain handles `ty`.
    pub fn resolve_row(&self, ty: &SqlType) -> Result<Arc<dyn RowMapper>, SqlPipelineError> {
        let generation = match cached(&self.row_cache, ty) {
            Ok(mapper) => return Ok(mapper),
            Err(generation) => generation,
        };

        let mut found = None;
        for factory in read(&self.rows).iter() {
            if let Some(mapper) = factory.build(ty, self)? {
                found = Some(mapper);
                break;
            }
        }
        let mapper = match found {
            Some(mapper) => mapper,
            None => match self.find_column(ty)? {
                Some(column) => Arc::new(SingleColumnMapper::new(column)) as Arc<dyn RowMapper>,
                None => return Err(SqlPipelineError::NoMapper(ty.clone())),
            },
        };

        store(&self.row_cache, generation, ty, &mapper);
        Ok(mapper)
    }

    /// # Errors
    ///
    /// Returns `SqlPipelineError::NoMapper` if no column factory handles `ty`.
    pub fn resolve_column(&self, ty: &SqlType) -> Result<Arc<dyn ColumnMapper>, SqlPipelineError> {
        self.find_column(ty)?
            .ok_or_else(|| SqlPipelineError::NoMapper(ty.clone()))
    }

    fn find_column(
        &self,
        ty: &SqlType,
    ) -> Result<Option<Arc<dyn ColumnMapper>>, SqlPipelineError> {
        let generation = match cached(&self.column_cache, ty) {
            Ok(mapper) => return Ok(Some(mapper)),
            Err(generation) => generation,
        };

        for factory in read(&self.columns).iter() {
            if let Some(mapper) = factory.build(ty, self)? {
                store(&self.column_cache, generation, ty, &mapper);
                return Ok(Some(mapper));
            }
        }
        Ok(None)
    }
}
