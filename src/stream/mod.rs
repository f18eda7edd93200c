//! The shared frame loop and the feed that carries its output to HTTP
//! consumers.

pub mod encoder;
pub mod feed;
pub mod session;

pub use encoder::{encode_jpeg, multipart_part, EncodedFrame, BOUNDARY};
pub use feed::{frame_feed, FramePublisher, FrameSubscriber};
pub use session::{FrameStreamSession, LoopStats, SessionParts};
