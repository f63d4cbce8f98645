pub mod gc;

pub use gc::GcWorker;
