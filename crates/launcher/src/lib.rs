//! # Genie Launcher
//!
//! Starts the Genie engine as a child process and waits until it is usable.
//!
//! ## Lifecycle
//!
//! ```text
//! ToolkitInstaller::ensure_installed   (pin record vs. packaged pin)
//!     │
//! EngineCommand  ─── node genie.js <contextual-genie|server> ...
//!     │
//! launch()
//!     ├─ spawn (stdout piped, stderr inherited, cwd = toolkit dist/tool)
//!     ├─ discover_port: scan stdout for "Server port number at ..., <port>"
//!     ├─ server mode: write port to the port-binding file
//!     └─ relay remaining stdout to the log
//!     │
//! EngineProcess  ─── port / base_url / wait / kill / shutdown
//! ```

mod command;
mod error;
mod install;
mod process;
mod readiness;

pub use command::{EngineCommand, EngineMode, ENGINE_ENTRY_POINT, NODE_PROGRAM, NODE_PROGRAM_ENV};
pub use error::{LaunchError, Result};
pub use install::{installed_commit, InstallStatus, ToolkitInstaller, ToolkitPin, PIN_RECORD_FILE};
pub use process::{launch, launch_command, EngineProcess, LaunchOptions};
pub use readiness::{discover_port, parse_port_announcement, PortScanner, Readiness};
