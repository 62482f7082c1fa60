/// Chunk size used when streaming the shared file (64KB)
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Longest file name we will create on the receiving side
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Output name when the server does not provide a usable one
pub const PLACEHOLDER_FILE_NAME: &str = "downloaded_file";
