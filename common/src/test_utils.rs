use std::path::PathBuf;
use std::sync::OnceLock;

/// Workspace root, one level above this crate's manifest.
fn workspace_root() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .map(PathBuf::from)
        .unwrap_or(manifest_dir)
}

pub fn test_output_dir() -> PathBuf {
    static DIR: OnceLock<PathBuf> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = workspace_root().join("test_output");
        std::fs::create_dir_all(&dir).expect("Failed to create test_output directory");
        dir
    })
    .clone()
}

/// Path of a test output file. Any file left by a previous run is removed.
pub fn test_output_path(name: &str) -> PathBuf {
    let path = test_output_dir().join(name);
    let _ = std::fs::remove_file(&path);
    path
}
