pub mod engine;
pub mod error;
pub mod filter;
pub mod meta;
pub mod params;
pub mod resource;
pub mod storage;

pub use engine::{DeleteReport, Engine};
pub use error::{ApiError, FieldError};
pub use filter::{FilterSpec, Op, Predicate};
pub use meta::{AccessMode, ControllerMeta, FieldMeta, ForeignRef, Operation};
pub use params::{
    DeleteParams, EditParams, GetParams, ListParams, NewParams, RawInput, DEFAULT_MAX_PAGE,
};
pub use resource::{Resource, RouteOptions};
pub use storage::{Record, Selection, SortDirection, Storage, StorageError};

pub mod prelude {
    //! Re-exports of the most commonly used types.
    pub use crate::{
        AccessMode, ApiError, ControllerMeta, Engine, ForeignRef, Operation, RawInput, Record,
        Resource, RouteOptions, Storage,
    };
}
