pub mod keys;
pub mod shared_store;

pub use shared_store::SharedStore;
