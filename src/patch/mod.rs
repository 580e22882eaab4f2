//! Typed batch patch engine for xlsx workbooks. Requests come in as raw
//! JSON ops, get normalized and validated against the op registry, are
//! routed to the file or live engine, and come back as a diff with
//! optional inverse ops and formula issues.

pub mod a1;
pub mod chart;
pub mod engine_file;
pub mod error;
pub mod formula_scan;
pub mod live;
pub mod model;
pub mod normalize;
pub mod op;
pub mod output;
pub mod registry;
pub mod select;
pub mod service;
pub mod validate;

pub use error::{EngineFailure, PatchOpError};
pub use model::{Backend, EngineKind, MakeRequest, PatchRequest, PatchResult};
pub use op::{PatchOp, PatchOpKind};
pub use service::{LiveConnector, PatchOrchestrator};
