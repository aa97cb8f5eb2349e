pub mod session;
pub mod task;
pub mod team;
pub mod user;

pub use session::{FocusSession, SessionKind, SessionStatus};
pub use task::{Task, TaskPriority, TaskStatus};
pub use team::Team;
pub use user::{UserProfile, UserStatus};
