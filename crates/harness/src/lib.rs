pub mod fixture;
pub mod logging;
pub mod remote;

pub use fixture::{PASSWORD, SERVER_URL, TestContext, USERNAME};
pub use logging::init_test_logging;
pub use remote::{FakeConnector, FakeRemoteStore, RemoteCall};
