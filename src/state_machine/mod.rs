// Service lifecycle states for a single controller run.

pub mod states;

pub use states::ServiceState;
