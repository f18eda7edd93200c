pub mod gesture;
pub mod session;

pub use gesture::{Command, FaceBox, FingerVector, Hand, Landmark, LANDMARK_COUNT};
pub use session::{Session, SessionState, ToolKind};
