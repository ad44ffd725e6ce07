pub mod datastructures;
pub mod stable_hash;
pub mod traits;
