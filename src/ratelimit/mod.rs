//! Rate limiting logic and state management.

mod backend;
mod block;
mod client;
mod clock;
mod counter;
mod decision;
mod key;
mod limiter;
mod rules;
mod sweeper;
mod violations;

pub use backend::RateLimitGate;
pub use block::BlockStore;
pub use client::{ClientIdentifier, X_FORWARDED_FOR, X_REAL_IP};
pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{WindowCheck, WindowCounterStore};
pub use decision::{
    Decision, Denial, DenialBody, DenyReason, FailurePolicy, QuotaStatus, HEADER_BLOCKED,
    HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET, HEADER_RETRY_AFTER,
};
pub use key::{ClientKey, CounterKey};
pub use limiter::{
    EngineSettings, RateLimitEngine, SweepStats, DEFAULT_BLOCK_DURATION,
    DEFAULT_VIOLATION_THRESHOLD,
};
pub use rules::{parse_limit, LimitFormatError, LimitPolicy, Period, QuotaWindow};
pub use sweeper::spawn_sweeper;
pub use violations::ViolationTracker;
