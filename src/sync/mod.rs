pub mod finance;
pub mod history;
pub mod integrity;
pub mod planner;
pub mod report;
pub mod retry;
pub mod schema;
pub mod universe;
pub mod workflow;

pub use finance::FinanceSyncEngine;
pub use history::{HistorySyncEngine, SyncOptions};
pub use integrity::IntegrityScanner;
pub use report::{FailedItem, ItemOutcome, PlannedRange, SyncReport};
pub use retry::RetryPolicy;
pub use universe::{normalize_component_code, IndustryTag, UniverseManager};
pub use workflow::{DailyWorkflow, WorkflowPlan};
