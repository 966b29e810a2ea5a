//! # Zentropi Agent
//!
//! Handler registration and matching, states, timers and the agent run
//! loop. Frames come from `zentropi-proto`; connections from
//! `zentropi-transport`.

#![warn(missing_docs)]

/// Agent orchestrator and lifecycle
pub mod agent;

/// Runtime settings and option containers
pub mod config;

/// Recently seen frame ids
pub mod dedup;

/// Agent error types
pub mod error;

/// Named values with provenance
pub mod fields;

/// Handler definitions and replies
pub mod handler;

/// Exact, parse and fuzzy matching
pub mod matcher;

/// Per-kind handler registries
pub mod registry;

/// States with veto handlers
pub mod states;

/// Background task supervision
pub mod supervisor;

/// Interval timers
pub mod timer;

pub use agent::{
    Agent, AgentBuilder, AgentStatus, Behavior, LIFECYCLE_PREFIX, SHOULD_STOP, STARTED, STOPPED,
};
pub use config::{AgentConfig, Config};
pub use dedup::SeenFrames;
pub use error::{AgentError, Result};
pub use fields::{Field, Source};
pub use handler::{Callback, Handler, HandlerId, MatchMode, Reply, CATCH_ALL};
pub use matcher::{HandlerIndex, Matched, Tier};
pub use registry::Registry;
pub use states::States;
pub use supervisor::{FailurePolicy, Supervisor, TaskFailure};
pub use timer::TimerScheduler;
pub use zentropi_proto::{Frame, FrameBuilder, Kind};
