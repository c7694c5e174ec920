pub mod pipeline;
pub mod reconcile;
