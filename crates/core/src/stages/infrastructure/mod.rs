pub mod external_command;
pub mod kaldi_feature_extractor;
pub mod kaldi_toolkit;
