pub mod pool;
pub mod sessions;
