pub mod text;

pub use text::{MergeOutcome, MergeResult, TextCrdt};
