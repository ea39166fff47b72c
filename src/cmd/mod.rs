//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|----------------------------------------------------|
//! | `run`           | `Run`                                              |
//! | `session`       | `Start`, `Resume`, `Show`, `Threads`, `History`    |
//! | `serve`         | `Serve`                                            |
//! | `mcp`           | `Mcp`                                              |
//! | `config`        | `Config`                                           |

pub mod config;
pub mod mcp;
pub mod run;
pub mod serve;
pub mod session;

pub use config::cmd_config;
pub use mcp::cmd_mcp;
pub use run::cmd_run;
pub use serve::cmd_serve;
pub use session::{cmd_history, cmd_resume, cmd_show, cmd_start, cmd_threads};
