use std::path::{Path, PathBuf};

pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

/// Lowercase, filesystem-safe form of a model label ("Flux Dev" -> "flux-dev").
pub fn slugify<S: AsRef<str>>(input: S) -> String {
    let mut slug = String::new();
    for c in input.as_ref().chars() {
        if c.is_alphanumeric() || matches!(c, '_' | '.') {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        "output".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `{dir}/{slug}-{index:02}.png` for the `index`th frame of a result batch.
pub fn image_output_path(dir: &Path, label: &str, index: usize) -> PathBuf {
    dir.join(format!("{}-{index:02}.png", slugify(label)))
}
