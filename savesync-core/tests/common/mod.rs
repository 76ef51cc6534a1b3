pub mod fixtures;
pub mod logging;

pub use fixtures::SaveTree;
pub use logging::init_test_logging;
