pub mod compare;
pub mod completion;
pub mod dispatcher;
pub mod enqueue;
pub mod executor;
pub mod retention;
pub mod summary;
