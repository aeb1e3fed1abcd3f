mod chat_state;
mod debug;
mod muc;
mod roster;

pub use chat_state::ChatStateProcessor;
pub use debug::DebugProcessor;
pub use muc::MucProcessor;
pub use roster::RosterProcessor;
