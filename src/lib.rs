pub mod blackboard;
pub mod capability;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod history;
pub mod interrupt;
pub mod logging;
pub mod mcp;
pub mod server;
pub mod supervisor;

pub use blackboard::{Blackboard, Delta, Draft, Status};
pub use engine::{GraphEngine, RunOutcome, StreamEvent};
pub use errors::{EngineError, EngineResult};
pub use interrupt::{Decision, InterruptController, ResumeInput};
