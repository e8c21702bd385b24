pub mod barometer;
pub mod decode;
pub mod dispatcher;
pub mod handles;
pub mod link;
pub mod reconnect;
pub mod session;

pub use reconnect::{supervise, ReconnectPolicy};
pub use session::{Session, SessionOptions, StopFlag};
