pub mod dumper;
pub mod null;

pub use dumper::Dumper;
pub use null::Null;
