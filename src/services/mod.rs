pub mod reconciler;
pub mod worker;
