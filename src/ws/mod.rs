pub mod protocol;
pub mod relay;
pub mod session;

pub use protocol::{ProtocolError, SyncMessage};
pub use relay::{create_router, Relay};
pub use session::{Outgoing, Session, SessionId};
