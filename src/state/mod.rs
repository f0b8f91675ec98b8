mod agent_state;
mod arena;
mod map;

pub use agent_state::AgentState;
pub use arena::{Arena, ArenaAgent};
pub use map::ArenaMap;
