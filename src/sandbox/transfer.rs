//! Binary-safe file transfer into the sandbox
//!
//! File content is base64-encoded on the host and decoded by `base64 -d`
//! inside the environment. The helper scripts below are fixed strings; the
//! destination path and the payload arrive as positional parameters, so
//! quotes, backticks, `$` and newlines in generated code can never change
//! what the shell runs.
//!
//! ```text
//! argv = ["sh", "-c", WRITE_SCRIPT, "sandfix-write", <path>, <base64 chunk>]
//! ```

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;

/// Raw bytes per chunk. A multiple of 3 so every chunk decodes on its own.
pub const CHUNK_RAW_BYTES: usize = 48 * 1024;

/// `$0` for the helper scripts, visible in `ps` inside the environment
pub const HELPER_NAME: &str = "sandfix-write";

/// Exit status used by the read/list helpers when the path is absent (EX_NOINPUT)
pub const MISSING_PATH_EXIT: i32 = 66;

/// Create parent directories, then truncate and write the first chunk
pub const WRITE_SCRIPT: &str =
    r#"set -e; mkdir -p "$(dirname "$1")"; printf '%s' "$2" | base64 -d > "$1""#;

/// Append a further chunk
pub const APPEND_SCRIPT: &str = r#"set -e; printf '%s' "$2" | base64 -d >> "$1""#;

/// Print a file, or exit 66 if it does not exist
pub const READ_SCRIPT: &str = r#"[ -e "$1" ] || exit 66; cat -- "$1""#;

/// Recursive listing, or exit 66 if the path does not exist
pub const LIST_SCRIPT: &str = r#"[ -e "$1" ] || exit 66; ls -R -- "$1""#;

/// Encode content into independently decodable base64 chunks
///
/// Empty content yields a single empty chunk so the file is still created.
pub fn encode_chunks(content: &[u8]) -> Vec<String> {
    if content.is_empty() {
        return vec![String::new()];
    }
    content
        .chunks(CHUNK_RAW_BYTES)
        .map(|chunk| BASE64_STANDARD.encode(chunk))
        .collect()
}

/// Build the argv sequence that writes `content` to `path`
pub fn write_commands(path: &str, content: &[u8]) -> Vec<Vec<String>> {
    encode_chunks(content)
        .into_iter()
        .enumerate()
        .map(|(i, payload)| {
            let script = if i == 0 { WRITE_SCRIPT } else { APPEND_SCRIPT };
            helper_argv(script, &[path, &payload])
        })
        .collect()
}

/// argv for reading `path`
pub fn read_command(path: &str) -> Vec<String> {
    helper_argv(READ_SCRIPT, &[path])
}

/// argv for listing `path` recursively
pub fn list_command(path: &str) -> Vec<String> {
    helper_argv(LIST_SCRIPT, &[path])
}

/// argv for running an agent-supplied shell command
pub fn shell_command(command: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), command.to_string()]
}

fn helper_argv(script: &str, params: &[&str]) -> Vec<String> {
    let mut argv = vec![
        "sh".to_string(),
        "-c".to_string(),
        script.to_string(),
        HELPER_NAME.to_string(),
    ];
    argv.extend(params.iter().map(|p| p.to_string()));
    argv
}

/// Decode a payload produced by [`encode_chunks`]
pub fn decode_chunk(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64_STANDARD.decode(payload)
}
