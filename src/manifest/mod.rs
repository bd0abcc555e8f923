pub mod dash;
pub mod hls;
