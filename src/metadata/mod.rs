mod tag_file;
mod tags;

pub use tag_file::{read_tag_file, write_tag_file};
pub use tags::{TagRecord, format_quiet, parse_quiet};
