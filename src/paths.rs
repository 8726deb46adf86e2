use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static EXE_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the directory containing the executable.
pub fn get_exe_dir() -> &'static PathBuf {
    EXE_DIR.get_or_init(|| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

/// Returns the logs directory: `<exe_dir>/logs/`
pub fn get_logs_dir() -> PathBuf {
    get_exe_dir().join("logs")
}

/// Returns the message catalog root: `<exe_dir>/_locales/`
pub fn get_locales_dir() -> PathBuf {
    get_exe_dir().join("_locales")
}

/// Resolves a configured path against the executable directory.
///
/// Absolute paths are returned unchanged.
pub fn resolve_exe_relative(path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        get_exe_dir().join(p)
    }
}

/// Ensures all output directories exist. Call at startup.
pub fn ensure_directories() -> std::io::Result<()> {
    std::fs::create_dir_all(get_logs_dir())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_joins_exe_dir() {
        let resolved = resolve_exe_relative("model/captcha.onnx");
        assert!(resolved.starts_with(get_exe_dir()));
        assert!(resolved.ends_with("model/captcha.onnx"));
    }

    #[test]
    fn test_resolve_absolute_unchanged() {
        let abs = std::env::temp_dir().join("captcha.onnx");
        let resolved = resolve_exe_relative(abs.to_str().unwrap());
        assert_eq!(resolved, abs);
    }
}
