pub mod line_writer;
pub mod redact;
pub mod template;
pub mod user_paths;
