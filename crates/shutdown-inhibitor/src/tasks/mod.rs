//! The long running tasks of the inhibitor.
//!
//! Each task receives its collaborators and the signals it fires or observes at
//! construction time and is driven by its `run` method. A task returns an error
//! only when the process can no longer do its job; everything else is handled
//! and logged inside the task.
//!
//! | task | waits for | fires |
//! |---|---|---|
//! | [`ShutdownSignalSource`] | host shutdown announcement, then unlock | shutdown |
//! | [`LockHolder`] | unlock | |
//! | [`NodeCordoner`] | shutdown | |
//! | [`PodObserver`] | shutdown, then an empty cohort | unlock |
//! | [`NodeConditionSetter`] | unlock | |
//!
//! Every task also stops early when the root cancellation signal fires.

mod condition_setter;
mod cordoner;
mod lock_holder;
mod pod_observer;
mod shutdown_signal;

pub use condition_setter::NodeConditionSetter;
pub use cordoner::NodeCordoner;
pub use lock_holder::LockHolder;
pub use pod_observer::PodObserver;
pub use shutdown_signal::ShutdownSignalSource;
