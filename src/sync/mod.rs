//! Polling-and-reconciliation core.
//!
//! Leaf-first:
//! - `token`: auth token cache with expiry-aware renewal
//! - `resolver`: self-healing device / parameter id discovery
//! - `snapshot`: one read of every parameter
//! - `detector` + `state`: debounced cycle detection and rolling statistics
//! - `indicator`: alternating write-back
//! - `scheduler`: pure poll-interval policy
//! - `orchestrator`: the loop that composes all of the above

pub mod clock;
pub mod detector;
pub mod indicator;
pub mod model;
pub mod orchestrator;
pub mod resolver;
pub mod scheduler;
pub mod snapshot;
pub mod state;
pub mod status;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use detector::{classify_change, CycleHistory, CycleStats, Detection};
pub use indicator::{IndicatorValue, IndicatorWriter};
pub use model::{numeric_value, DeviceConfig, ParameterSnapshot};
pub use orchestrator::{RunSummary, Step, Synchronizer};
pub use resolver::{classify_parameters, merge, resolve, select_device, Discovery};
pub use scheduler::{next_interval, PollPolicy};
pub use snapshot::fetch_snapshot;
pub use state::CycleState;
pub use status::{shared_status, LoopState, SharedStatus, SyncStatus};
pub use token::{AuthToken, Credentials, TokenCache};
