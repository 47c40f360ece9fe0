pub mod cancel;
pub mod dismiss;
pub mod registry;
pub mod task;
