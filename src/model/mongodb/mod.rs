mod collection;
mod errors;

pub use collection::{ensure_indexes_exist, Coll, MongoCollection};
pub use errors::is_duplicate_key;
