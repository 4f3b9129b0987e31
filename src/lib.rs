pub mod auto_connect;
pub mod j2534;
pub mod profiles;
pub mod protocol;
pub mod session;
pub mod uds;

pub use auto_connect::{auto_connect, find_device, scan_profiles, AutoConnectMatch, ProfileHit};
pub use profiles::{ConnectionProfile, ProfileError, ProfileTable};
pub use protocol::ProtocolFamily;
pub use session::{ChannelSession, SessionError, SessionState};
pub use uds::{TransactionEngine, TransactionError};
