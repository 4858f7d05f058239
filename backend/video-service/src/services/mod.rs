pub mod counters;
pub mod presigned;
pub mod video;

pub use counters::CounterService;
pub use presigned::PresignedUrlCache;
pub use video::VideoService;
