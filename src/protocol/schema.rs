//! Action schema as presented to the reasoning backend

/// Structured dialect: one JSON object per reply
pub const STRUCTURED_SCHEMA: &str = r#"API SCHEMA (reply with exactly one JSON object):
1. List files:  {"kind": "list_files", "path": "."}
2. Read file:   {"kind": "read_file", "path": "filename.py"}
3. Write file:  {"kind": "write_file", "path": "filename.py", "content": "full new file content"}
4. Run tests:   {"kind": "run_test"}"#;

/// Legacy dialect: the reply starts with a command name
pub const LEGACY_SCHEMA: &str = r#"AVAILABLE TOOLS:
1. LIST_FILES <dir_path>  (Example: LIST_FILES src/)
2. READ_FILE <file_path>  (Example: READ_FILE src/utils.py)
3. WRITE_FILE <file_path> (Overwrites the file with the code on the following lines)
4. RUN_TEST               (Runs the test suite)

To use a tool, start your response with the command.

EXAMPLE RESPONSE (fixing a bug):
WRITE_FILE src/math_lib.py
def add(a, b):
    return a + b"#;

/// JSON Schema of a structured decision, usable as a constrained output format
pub fn action_json_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "kind": {
                "type": "string",
                "enum": ["list_files", "read_file", "write_file", "run_test"],
                "description": "The action to perform"
            },
            "path": {
                "type": "string",
                "description": "File or directory path (list_files, read_file, write_file)"
            },
            "content": {
                "type": "string",
                "description": "Complete new file content (write_file)"
            },
            "cmd": {
                "type": "string",
                "description": "Test command (run_test, optional)"
            }
        },
        "required": ["kind"]
    })
}
