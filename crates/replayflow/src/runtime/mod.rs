//! Runtime: registration and timer processing.
//!
//! - [`Registry`] — workflows, operations, and callback handlers known to an engine
//! - [`TimerProcessor`] — polls the timer store and dispatches due timers
//! - [`RuntimeConfig`] — polling interval, lease duration, and concurrency
//!
//! # Example
//!
//! ```ignore
//! use replayflow::{Engine, MemoryStore, Registry, RuntimeConfig, TimerProcessor};
//!
//! let registry = Registry::builder()
//!     .workflow::<OrderWorkflow>()
//!     .operation(Payments::new(client))
//!     .build()?;
//! let engine = Engine::new(registry, MemoryStore::new());
//!
//! TimerProcessor::new(engine, RuntimeConfig::default())
//!     .run(shutdown_signal)
//!     .await?;
//! ```

mod config;
mod handlers;
pub(crate) mod registry;
mod timer_processor;

pub use config::RuntimeConfig;
pub use registry::{Registry, RegistryBuilder};
pub use timer_processor::TimerProcessor;
