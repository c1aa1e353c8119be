pub mod due;
pub mod enrich;
pub mod queue;
pub mod status;
pub mod sync;
