pub mod engine;
pub mod state;

pub use engine::{EngineEvent, FocusSessionEngine, TimerConfig, TimerSnapshot};
pub use state::{TimerPhase, TimerState};
