//! # Zentropi
//!
//! Agents that exchange frames over shared spaces.
//!
//! An [`Agent`] registers handlers for events, messages, commands, requests
//! and states, connects to one or more endpoints and joins spaces. Frames
//! broadcast into a space reach every other member; handlers that answer
//! with text have their reply threaded back to the sender.
//!
//! ```no_run
//! use zentropi::prelude::*;
//!
//! # async fn demo() -> zentropi::Result<()> {
//! let runtime = Runtime::new();
//! let agent = Agent::builder("echo")
//!     .runtime(runtime.clone())
//!     .handler(Handler::on_message("say {text}", |_, frame| {
//!         Ok(frame.get_str("text").map(str::to_string))
//!     }).parse())
//!     .build()?;
//! agent.bind("inmemory://lab", None).await?;
//! agent.join("lobby", None).await?;
//! agent.run().await
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use zentropi_agent as agent;
pub use zentropi_proto as proto;
pub use zentropi_transport as transport;

pub use zentropi_agent::{
    Agent, AgentBuilder, AgentConfig, AgentError, AgentStatus, Behavior, Config, FailurePolicy,
    Field, Handler, HandlerId, MatchMode, Reply, Result, CATCH_ALL, STARTED, STOPPED,
};
pub use zentropi_proto::{Frame, FrameBuilder, Kind, ProtocolError};
pub use zentropi_transport::{ReconnectPolicy, Runtime, TransportConfig, TransportError};

/// Common imports for writing agents
pub mod prelude {
    pub use crate::{
        Agent, AgentBuilder, AgentConfig, AgentError, Behavior, FailurePolicy, Frame, Handler,
        Kind, Reply, Runtime, CATCH_ALL, STARTED, STOPPED,
    };
}
