//! Planned changes, saved plans and the JSON change report.

mod changes;
mod plan;
pub mod report;

pub use changes::{
    Action, AttributePath, ChangeSummary, Changes, OutputChange, ResourceInstanceChange,
    SyncChanges,
};
pub use plan::{Plan, PlanMode, StateOrigin};
pub use report::ChangeReport;
