pub mod buffer;
pub mod timeline;
