pub mod prefetching_batch_source;
pub mod shared_batch_dispenser;
