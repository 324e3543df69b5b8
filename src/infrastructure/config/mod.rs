//! Infrastructure configuration modules.

pub mod exchange;
pub mod logging;
pub mod reconnection;
pub mod settings;
