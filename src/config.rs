use std::path::PathBuf;
use std::time::Duration;

/// Canonical document name for resource-level (dataset) metadata
pub const DATASET_METADATA_FILENAME: &str = "dataset_metadata.json";

/// Name of the user-supplied metadata file that marks a dataset directory
pub const DEFAULT_USER_METADATA_FILENAME: &str = "hs_user_meta.json";

/// Where generated metadata documents are externally reachable
pub const DEFAULT_OUTPUT_BASE_URL: &str =
    "https://hydroshare.org/resource/extracted_metadata/data/contents";

/// Where source content files are externally reachable
pub const DEFAULT_INPUT_BASE_URL: &str = "https://hydroshare.org/resource";

/// Per-file extraction timeout in seconds (0 disables)
pub const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 300;

/// Name used in `hasPart` entries when a child document has no name
pub const MISSING_NAME: &str = "Not Found and name is required";

/// Segments starting with this marker are hidden and never cataloged
pub const HIDDEN_PREFIX: char = '.';

/// Everything the pipeline needs, threaded explicitly through every stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub input_base_url: String,
    pub output_base_url: String,
    pub user_metadata_filename: String,
    pub max_parallel: usize,
    pub timeout: Option<Duration>,
    pub show_progress: bool,
}

impl PipelineConfig {
    pub fn new(input_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            input_base_url: DEFAULT_INPUT_BASE_URL.to_string(),
            output_base_url: DEFAULT_OUTPUT_BASE_URL.to_string(),
            user_metadata_filename: DEFAULT_USER_METADATA_FILENAME.to_string(),
            max_parallel: default_parallelism(),
            timeout: timeout_from_secs(DEFAULT_EXTRACT_TIMEOUT_SECS),
            show_progress: false,
        }
    }
}

/// Bounded by the host's available parallelism; falls back to 4.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
