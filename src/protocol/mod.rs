pub mod command;
pub mod frame;
pub mod reply;

pub use command::{Command, CommandExecutor};
pub use frame::{FrameError, MAX_ARGS, MAX_MSG};
pub use reply::{write_reply, Reply, Status};
