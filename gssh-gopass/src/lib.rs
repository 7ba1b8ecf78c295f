pub mod backend;

pub use backend::GopassBackend;
