//! Data types shared by the controller, ledger, and notification channel.
//!
//! Results, progress info, and input values are opaque JSON (`serde_json::Value`).

mod checkpoint;
mod group_node;
mod job_descriptor;
mod job_event;
mod job_handle;
mod job_state;
mod progress_sample;
mod repeat_directive;
mod start_options;

pub use checkpoint::Checkpoint;
pub use group_node::GroupNode;
pub use job_descriptor::JobDescriptor;
pub use job_event::{ActiveJobInfo, CurrentSnapshot, InputRequest, JobEvent};
pub use job_handle::{EarlyStop, JobHandle, JobId};
pub use job_state::JobState;
pub use progress_sample::ProgressSample;
pub use repeat_directive::{RepeatDirective, RepeatMode};
pub use start_options::{NestedOptions, StartOptions};
