//! Building blocks for [`clap`]-driven command line interfaces.

pub mod checkpoint;
pub mod consumer;
pub mod logging;
pub mod runtime;
