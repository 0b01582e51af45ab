pub mod channel;
pub mod clip;
pub mod id;
pub mod recording;
pub mod stream_session;

pub use channel::*;
pub use clip::*;
pub use id::*;
pub use recording::*;
pub use stream_session::*;
