//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::argument::{ArgumentFactory, ArgumentRegistry, Encoder, FnArgumentFactory};
pub use crate::binding::{Binding, MapFinder, NamedArgumentFinder};
pub use crate::cleanup::{Cleanable, CleanupChain, HandleDisposition};
pub use crate::config::{EngineConfig, EngineConfigBuilder, EnumStrategy};
pub use crate::descriptor::StructDescriptor;
pub use crate::driver::{Cursor, Execution, NativeStatement, Session};
pub use crate::engine::Engine;
pub use crate::error::{CleanupFailure, SqlPipelineError};
pub use crate::handle::Handle;
pub use crate::locator::{MapTemplateLocator, TemplateLocator};
pub use crate::mapper::{
    ColumnMapper, ColumnMapperFactory, FnColumnMapperFactory, FnRowMapperFactory,
    MappingRegistry, RowMapper, RowMapperFactory,
};
pub use crate::results::{DbRow, ResultIterator};
pub use crate::statement::{Batch, Statement, StatementContext};
pub use crate::translation::{Attributes, PlaceholderStyle, RewritePlan, Slot, SqlRewriter};
pub use crate::typed::SqlTyped;
pub use crate::types::{CustomValue, EnumType, EnumValue, RowValues, SqlType, Value};
