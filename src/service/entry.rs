//! Entry point resolution
//!
//! A locator `module:object` names a module inside the staged application
//! and an object defined in it. Resolution only checks existence; the
//! object is never loaded or executed.

use crate::error::{DockyardError, DockyardResult};
use std::path::{Path, PathBuf};
use tokio::fs;

/// A resolved entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// Locator as configured
    pub locator: String,
    /// Dotted module path
    pub module: String,
    /// Object name within the module
    pub object: String,
    /// File defining the module
    pub file: PathBuf,
}

/// Resolve `locator` against the staged application directory.
///
/// The module (dots become path separators) must exist as
/// `<module>.<ext>` or as a package directory with `__init__.<ext>`, for one
/// of `extensions`, and `object` must appear in it as an identifier.
pub async fn resolve(
    app_dir: &Path,
    locator: &str,
    extensions: &[String],
) -> DockyardResult<EntryPoint> {
    let not_found = || DockyardError::EntryPointNotFound {
        entry: locator.to_string(),
    };

    let (module, object) = locator.split_once(':').ok_or_else(not_found)?;
    if !is_identifier(object) {
        return Err(not_found());
    }

    let segments: Vec<&str> = module.split('.').collect();
    if segments.iter().any(|s| !is_identifier(s)) {
        return Err(not_found());
    }
    let module_path = segments.iter().collect::<PathBuf>();

    let candidates = extensions.iter().flat_map(|ext| {
        [
            app_dir.join(&module_path).with_extension(ext),
            app_dir.join(&module_path).join(format!("__init__.{}", ext)),
        ]
    });
    let mut file = None;
    for candidate in candidates {
        if fs::metadata(&candidate).await.is_ok_and(|m| m.is_file()) {
            file = Some(candidate);
            break;
        }
    }
    let file = file.ok_or_else(not_found)?;

    let source = fs::read_to_string(&file).await.map_err(|_| not_found())?;
    if !defines_identifier(&source, object) {
        return Err(not_found());
    }

    Ok(EntryPoint {
        locator: locator.to_string(),
        module: module.to_string(),
        object: object.to_string(),
        file,
    })
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Whether `name` occurs in `source` bounded by non-identifier characters
fn defines_identifier(source: &str, name: &str) -> bool {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    source.match_indices(name).any(|(start, _)| {
        let before = source[..start].chars().next_back();
        let after = source[start + name.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}
