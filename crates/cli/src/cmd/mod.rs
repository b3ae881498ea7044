mod cancel;
mod poll;
mod resolve;
mod retire;
mod serve;
mod status;
mod submit;

pub use cancel::cmd_cancel;
pub use poll::cmd_poll;
pub use resolve::cmd_resolve;
pub use retire::cmd_retire;
pub use serve::cmd_serve;
pub use status::cmd_status;
pub use submit::cmd_submit;
