//! Role processors: the framework-facing entry points for each execution
//! phase.
//!
//! One configuration model, three processing roles plus a data-free
//! validation role:
//!
//! - [`PreShuffleProcessor`] — one record at a time, before redistribution;
//! - [`GroupProcessor`] — grouped record sets after the shuffle (aggregation)
//!   or on the same node before it (local pre-aggregation);
//! - [`ValidationProcessor`] — stage initialization and self-validation only.
//!
//! Each maps 1:1 onto the lifecycle hooks the surrounding distributed
//! framework invokes per task attempt: `setup`, `process`/`process_group`,
//! `teardown`.

mod post_shuffle;
mod pre_shuffle;
mod validate;

pub use post_shuffle::GroupProcessor;
pub use pre_shuffle::PreShuffleProcessor;
pub use validate::ValidationProcessor;
