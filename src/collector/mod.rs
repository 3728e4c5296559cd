pub mod cycle;
pub mod lag_calculator;
pub mod offset_collector;

pub use cycle::{CollectionCycle, CycleState, CycleTrigger};
pub use offset_collector::GroupCatalog;
