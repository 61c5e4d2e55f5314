//! orca-scaling: instance scaling for deployed nodes.
//!
//! # Scaling Algorithm
//!
//! ```text
//! scale up by d on node n:
//!     effective = min(d, max - current)
//!     for each network / local_storage requirement target t:
//!         allocate `effective` instances on t      // dependencies first
//!     allocate `effective` instances on n          // lowest unused indices
//!     nb_instances(n) = current + effective
//!
//! scale down by d on node n:
//!     effective = min(d, current - min)
//!     retired   = highest `effective` live indices of n, descending
//!     delete retired subtrees on every requirement target, then on n
//!     nb_instances(n) = current - effective
//! ```
//!
//! Both run entirely under the deployment lock inside
//! [`orca_tasks::TaskRegistry::register_task_with`], so the conflict check
//! precedes any instance mutation. An `effective` delta of zero still
//! registers a task, with an empty id list.

pub mod error;
pub mod scaler;

pub use error::{ScaleError, ScaleResult};
pub use scaler::{
    LINKED_REQUIREMENTS, ScaleOutcome, ScalingCoordinator, clamp_scale_down, clamp_scale_up,
};
