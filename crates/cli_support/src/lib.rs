pub mod common;
pub mod logging;

pub use common::RunDirArgs;
pub use logging::init_logging;
