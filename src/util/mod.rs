pub mod constants;
pub mod errors;
pub mod file_utils;
pub mod probs;
pub mod read_function;
pub mod scimm_types;
pub mod write_function;
