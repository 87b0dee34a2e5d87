pub mod compaction;
pub mod constraints;
pub mod partition;
pub mod posterior;
