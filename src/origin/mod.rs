mod client;
mod poll;

pub use client::OriginClient;
pub use poll::{PollResponse, check_content_type, parse_poll_body};
