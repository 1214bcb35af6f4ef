//! Constants shared across the crate.

/// Application name, used for config directories and temp prefixes.
pub const APP_NAME: &str = "kiln";

/// Attempts made by the retry wrapper when neither the environment nor the
/// project overrides it.
pub const DEFAULT_RETRY_COUNT: u32 = 1;

/// Per-attempt timeout (seconds) for the retry wrapper.
pub const DEFAULT_TIMEOUT_SECS: u64 = 7200;

/// Upper bound on HTTP redirects followed while downloading sources.
pub const MAX_REDIRECTS: usize = 10;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// File names written into the local work directory.
pub const MAKEFILE_NAME: &str = "Makefile";
pub const BOM_FILENAME: &str = "bill-of-materials";
pub const BUILD_METADATA_FILENAME: &str = "build_metadata.json";

/// Extraction command for components whose source needs no unpacking.
pub const NOTHING_TO_EXTRACT: &str = ": nothing to extract";

/// Directory (relative to the remote work directory) packagers write into.
pub const OUTPUT_DIR: &str = "output";

/// Directory (relative to the work directory) patches are staged under.
pub const PATCHES_DIR: &str = "patches";

/// Rules shared by every project's Makefile.
pub const FILE_LIST_BEFORE_BUILD: &str = "file-list-before-build";
pub const FILE_LIST_AFTER_BUILD: &str = "file-list-after-build";
