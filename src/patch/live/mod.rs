//! Live-host execution path. Ops run inside an attached spreadsheet
//! application through a late-bound dispatch seam, so the host itself
//! recalculates formulas and owns chart/table object semantics.

pub mod dispatch;
pub mod engine;

pub use dispatch::{ComValue, Dispatch, DispatchError, DispatchRef};
pub use engine::{LiveEngine, LiveEngineOutcome};
