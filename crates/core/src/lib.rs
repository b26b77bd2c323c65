//! Sales Agent Core
//!
//! Transport-free building blocks of the realtime voice-session relay: the
//! session configuration builder, the upstream wire dialects, the completion
//! detector and the client-tool dispatcher. Nothing in here touches a socket.

pub mod completion;
pub mod error;
pub mod realtime;
pub mod session;
pub mod session_config;
pub mod tools;
pub mod vehicle;

pub use completion::{CompletionDetector, CompletionStrategy, ConversationComplete, SignalKind};
pub use error::{ConfigurationError, UnknownToolError};
pub use realtime::{Dialect, UpstreamEvent};
pub use session::{ConnectionState, Session};
pub use session_config::{SessionConfig, SessionConfigBuilder, SessionOptions};
pub use tools::{ToolDispatcher, ToolEffects, ToolInvocation, ToolOutcome};
pub use vehicle::{Recommendations, VehicleDescriptor};
