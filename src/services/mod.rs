pub mod projector;
pub mod storage;
