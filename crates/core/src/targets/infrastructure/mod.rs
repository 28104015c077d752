pub mod alignment_file;
