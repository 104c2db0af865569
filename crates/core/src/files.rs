use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{Error, Result};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
}

/// Image files directly inside `dir`, ordered by file name.
///
/// Subdirectories are not descended into. An empty result is not an error here.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::InvalidConfig {
            message: format!("images directory '{}' does not exist", dir.display()),
        });
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        if is_image_path(entry.path()) {
            images.push(entry.into_path());
        }
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_match_is_case_insensitive() {
        assert!(is_image_path(Path::new("a/B.JPG")));
        assert!(is_image_path(Path::new("x.WebP")));
        assert!(is_image_path(Path::new("x.jpeg")));
        assert!(!is_image_path(Path::new("x.bmp")));
        assert!(!is_image_path(Path::new("jpg")));
        assert!(!is_image_path(Path::new("notes.txt")));
    }

    #[test]
    fn lists_sorted_images_and_skips_everything_else() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path();
        for name in ["b.png", "a.JPG", "c.gif", "readme.md", "d.webp"] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }
        std::fs::create_dir_all(dir.join("nested.png")).unwrap();
        std::fs::write(dir.join("nested.png").join("inner.png"), b"x").unwrap();

        let names: Vec<String> = list_images(dir)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.png", "c.gif", "d.webp"]);
    }

    #[test]
    fn missing_directory_is_invalid_config() {
        let temp = tempfile::tempdir().unwrap();
        let err = list_images(&temp.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn empty_directory_yields_empty_list() {
        let temp = tempfile::tempdir().unwrap();
        assert!(list_images(temp.path()).unwrap().is_empty());
    }
}
