//! Budgeted context assembly: tiered message selection, threshold-triggered
//! compaction, and the injected-context builder.

pub mod budget;
pub mod compactor;
pub mod injection;

pub use budget::{BudgetAllocator, BudgetConfig, BudgetEntry, BudgetReport, Tier};
pub use compactor::{CompactionConfig, Compactor};
pub use injection::{strip_injected_blocks, InjectionBuilder, RecallEntry};
