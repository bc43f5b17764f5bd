pub mod document;
pub mod panic_handler;
pub mod settings;
pub mod viewer;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use settings::Settings;
pub use viewer::{Command, Pipeline, ViewerPanel, ViewerSet, ViewerState, ZoomLimits};
