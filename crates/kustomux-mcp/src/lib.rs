pub mod client;
pub mod health;
pub mod merge;
pub mod protocol;
pub mod router;
pub mod server;
pub mod supervisor;

pub use client::McpClient;
pub use health::HealthLoop;
pub use merge::{ToolMerger, ToolTable};
pub use router::{Dispatch, DispatchRouter};
pub use server::RouterBridge;
pub use supervisor::{ChildCommand, EndpointStatus, EndpointSupervisor};
