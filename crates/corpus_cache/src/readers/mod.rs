pub mod jsonl;

pub use jsonl::JsonlSource;
