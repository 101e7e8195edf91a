pub mod connection_quality;
pub mod image_cache;
pub mod images;
pub mod task_pool;
