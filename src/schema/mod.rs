pub mod canonical;
pub mod decode;
pub mod reconcile;
pub mod values;

pub use canonical::CanonicalField;
pub use decode::TextDecoder;
pub use reconcile::{reconcile, ColumnPlan, ColumnRole, ExcludedTable, Reconciliation, TableStats};
