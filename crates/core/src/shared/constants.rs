pub const FEATS_INDEX: &str = "feats.scp";
pub const FEATS_ARK: &str = "feats.ark";
pub const SHUFFLED_FEATS_INDEX: &str = "feats_shuffled.scp";
pub const CMVN_INDEX: &str = "cmvn.scp";
pub const CMVN_ARK: &str = "cmvn.ark";
pub const UTT2SPK: &str = "utt2spk";
pub const SPK2UTT: &str = "spk2utt";
pub const TEXT: &str = "text";
pub const MAX_LENGTH: &str = "maxlength";

pub const GMM_MODEL: &str = "final.mdl";
pub const ALIGNMENT_DIR: &str = "ali";
pub const GRAPH_DIR: &str = "graph";
pub const NUM_PDFS: &str = "num_pdfs";
pub const ALL_ALIGNMENTS: &str = "pdf.all";

pub const DECODE_DIR: &str = "decode";
pub const LIKELIHOODS_ARK: &str = "likelihoods.ark";
pub const KALDI_DECODE_DIR: &str = "kaldi_decode";

/// Floor on the per-dimension variance before taking the square root.
pub const CMVN_VARIANCE_FLOOR: f64 = 1e-10;

/// Alignment file for a 1-based job number.
pub fn job_alignment_file(job: usize) -> String {
    format!("pdf.{job}.gz")
}
