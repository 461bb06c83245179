//! Behaviors maintained while a unit of work is flushed.
//!
//! The crate keeps derived state on managed objects consistent:
//!
//! * [`tree`]: nested-set, closure-table and materialized-path hierarchies;
//! * [`sortable`]: contiguous zero-based positions within groups;
//! * [`sluggable`]: URL-safe, optionally unique slugs.
//!
//! Listeners are registered in [`Behaviors`] and run by [`Session::flush`]
//! inside one store transaction. Stores implement [`BackingStore`]: an
//! in-memory [`DocumentStore`] and a SeaORM-backed [`RelationalStore`] ship
//! with the crate.

extern crate self as orm_behaviors;

pub mod config;
pub mod context;
pub mod error;
pub mod lock;
pub mod sluggable;
pub mod sortable;
pub mod store;
pub mod traits;
pub mod tree;
pub mod uow;
pub mod value;

pub mod prelude {
    //! Convenient re-exports for consumers.
    pub use crate::config::{
        SlugStyle, SluggableConfig, SluggableOptions, SortableConfig, SortableOptions,
        TreeConfig, TreeOptions, TreeStrategyKind,
    };
    pub use crate::store::{BackingStore, DocumentStore, Filter, RelationalStore, Sort};
    pub use crate::traits::Managed;
    pub use crate::tree::{Position, SortDirection, Steps};
    pub use crate::uow::{Behaviors, Session, UnitOfWork};
    pub use crate::value::FieldValue;
}

#[doc(hidden)]
pub mod __private {
    pub use once_cell::sync::Lazy;
}

pub use config::{
    SlugStyle, SluggableConfig, SluggableOptions, SortableConfig, SortableOptions, TreeConfig,
    TreeOptions, TreeStrategyKind,
};
pub use context::FlushContext;
pub use error::BehaviorError;
pub use lock::LockedTransaction;
pub use orm_behaviors_macros::Managed;
pub use sluggable::SluggableListener;
pub use sortable::SortableListener;
pub use store::{Assignment, BackingStore, Condition, DocumentStore, Filter, RelationalStore, Sort};
pub use traits::{FieldSlot, Managed, Row};
pub use tree::{
    ClosureTreeRepository, MaterializedPathRepository, NestedTreeRepository, Placement, Position,
    SortDirection, Steps, TreeListener, VerifyReport,
};
pub use uow::{Behaviors, Change, ChangeSet, Session, UnitOfWork};
pub use value::{FieldValue, FromFieldValue};
