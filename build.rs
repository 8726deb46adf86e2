use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    // Copy config, message catalogs and a bundled model next to the executable
    let Some(target_dir) = target_dir() else {
        println!("cargo:warning=Could not find target directory, skipping resource copy");
        return;
    };

    copy_config(&target_dir);
    copy_resource_dir(Path::new("_locales"), &target_dir.join("_locales"));
    copy_resource_dir(Path::new("model"), &target_dir.join("model"));
}

/// OUT_DIR is something like target/release/build/captcha-digits-xxx/out;
/// the executable lives 3 levels up.
fn target_dir() -> Option<PathBuf> {
    let out_dir = env::var("OUT_DIR").ok()?;
    Path::new(&out_dir).ancestors().nth(3).map(Path::to_path_buf)
}

/// Copies a directory if it exists and tells Cargo to re-run when it changes.
fn copy_resource_dir(src: &Path, dst: &Path) {
    if src.exists() {
        copy_dir_recursive(src, dst);
        println!("cargo:rerun-if-changed={}/", src.display());
    }
}

/// Recursively copies a directory and its contents.
fn copy_dir_recursive(src: &Path, dst: &Path) {
    let _ = fs::create_dir_all(dst);

    if let Ok(entries) = fs::read_dir(src) {
        for entry in entries.flatten() {
            let src_path = entry.path();
            let dst_path = dst.join(entry.file_name());

            if src_path.is_dir() {
                copy_dir_recursive(&src_path, &dst_path);
            } else {
                let _ = fs::copy(&src_path, &dst_path);
            }
        }
    }
}

/// Copies config.json to the target directory.
fn copy_config(target_dir: &Path) {
    let config_src = Path::new("config.json");
    if config_src.exists() {
        let _ = fs::copy(config_src, target_dir.join("config.json"));
        println!("cargo:rerun-if-changed=config.json");
    }
}
