pub mod extract;
pub mod zip;

pub use extract::extract_archive;
