pub mod ark_reader;
mod ark_record;
pub mod ark_writer;
pub mod feature_index;
pub mod feature_prep;
pub mod feature_reader;
