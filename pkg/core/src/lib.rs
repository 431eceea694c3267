pub mod fs;

pub use fs::DirLock;
