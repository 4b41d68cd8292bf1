pub mod atomic_copy;
pub mod disk_space;
pub mod paths;
pub mod walker;
