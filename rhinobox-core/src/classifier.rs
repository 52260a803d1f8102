//! C2: Type Classifier. Decision order per spec.md §4.2: learned rule by
//! extension, learned rule by mime, built-in extension table, built-in mime
//! prefix/class table, then `other/unknown`.

use crate::routing::RoutingRuleStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: String,
    pub subcategory: String,
    pub unrecognised: bool,
}

impl Classification {
    pub fn path(&self) -> String {
        format!("{}/{}", self.category, self.subcategory)
    }
}

const EXTENSION_TABLE: &[(&str, &str, &str)] = &[
    // images
    (".jpg", "images", "jpg"),
    (".jpeg", "images", "jpg"),
    (".png", "images", "png"),
    (".gif", "images", "gif"),
    (".webp", "images", "webp"),
    (".ico", "images", "ico"),
    (".svg", "images", "svg"),
    (".bmp", "images", "bmp"),
    (".tiff", "images", "tiff"),
    // videos
    (".mp4", "videos", "mp4"),
    (".mov", "videos", "mov"),
    (".avi", "videos", "avi"),
    (".mkv", "videos", "mkv"),
    (".webm", "videos", "webm"),
    (".flv", "videos", "flv"),
    // audio
    (".mp3", "audio", "mp3"),
    (".wav", "audio", "wav"),
    (".flac", "audio", "flac"),
    (".aac", "audio", "aac"),
    (".ogg", "audio", "ogg"),
    (".m4a", "audio", "m4a"),
    // documents
    (".pdf", "documents", "pdf"),
    (".doc", "documents", "doc"),
    (".docx", "documents", "docx"),
    (".txt", "documents", "txt"),
    (".md", "documents", "md"),
    (".odt", "documents", "odt"),
    (".epub", "documents", "epub"),
    (".rtf", "documents", "rtf"),
    // spreadsheets
    (".xls", "spreadsheets", "xls"),
    (".xlsx", "spreadsheets", "xlsx"),
    (".ods", "spreadsheets", "ods"),
    (".csv", "spreadsheets", "csv"),
    // presentations
    (".ppt", "presentations", "ppt"),
    (".pptx", "presentations", "pptx"),
    (".odp", "presentations", "odp"),
    // archives
    (".zip", "archives", "zip"),
    (".tar", "archives", "tar"),
    (".gz", "archives", "gz"),
    (".7z", "archives", "7z"),
    (".rar", "archives", "rar"),
    (".bz2", "archives", "bz2"),
    // code
    (".json", "code", "json"),
    (".xml", "code", "xml"),
    (".yaml", "code", "yaml"),
    (".yml", "code", "yaml"),
    (".go", "code", "go"),
    (".py", "code", "py"),
    (".js", "code", "js"),
    (".ts", "code", "ts"),
    (".rs", "code", "rs"),
    (".java", "code", "java"),
    (".c", "code", "c"),
    (".cpp", "code", "cpp"),
    (".sh", "code", "sh"),
    (".toml", "code", "toml"),
];

/// Sniffs a coarse MIME class from a magic-byte prefix, the way a real
/// deployment would feed `sniffed_mime` into the classifier. Only the
/// handful of signatures the built-in table cares about are recognised;
/// anything else falls through to the declared `mime_type`.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\xFF\xD8\xFF") {
        Some("image/jpeg")
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.starts_with(b"%PDF-") {
        Some("application/pdf")
    } else if bytes.starts_with(b"PK\x03\x04") {
        Some("application/zip")
    } else {
        None
    }
}

fn extension_of(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| format!(".{}", ext.to_lowercase()))
}

fn builtin_by_extension(ext: &str) -> Option<(&'static str, &'static str)> {
    EXTENSION_TABLE
        .iter()
        .find(|(e, _, _)| *e == ext)
        .map(|(_, cat, sub)| (*cat, *sub))
}

fn builtin_by_mime(mime: &str) -> Option<(&'static str, &'static str)> {
    let mime = mime.to_lowercase();
    if let Some(sub) = mime.strip_prefix("image/") {
        return Some(("images", leak_sub(sub)));
    }
    if let Some(sub) = mime.strip_prefix("video/") {
        return Some(("videos", leak_sub(sub)));
    }
    if let Some(sub) = mime.strip_prefix("audio/") {
        return Some(("audio", leak_sub(sub)));
    }
    match mime.as_str() {
        "application/pdf" => Some(("documents", "pdf")),
        "application/msword" => Some(("documents", "doc")),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
            Some(("documents", "docx"))
        }
        "application/zip" => Some(("archives", "zip")),
        "application/x-tar" => Some(("archives", "tar")),
        "application/gzip" | "application/x-gzip" => Some(("archives", "gz")),
        "application/json" => Some(("code", "json")),
        "application/xml" | "text/xml" => Some(("code", "xml")),
        "text/plain" => Some(("documents", "txt")),
        _ => None,
    }
}

/// The mime subtype table is small and fixed; subtypes we expect are
/// `'static` string literals, so this only ever matches a literal back out.
fn leak_sub(sub: &str) -> &'static str {
    match sub {
        "jpeg" | "jpg" => "jpg",
        "png" => "png",
        "gif" => "gif",
        "webp" => "webp",
        "mp4" => "mp4",
        "quicktime" => "mov",
        "x-msvideo" => "avi",
        "webm" => "webm",
        "mpeg" => "mp3",
        "wav" | "x-wav" => "wav",
        "flac" => "flac",
        "ogg" => "ogg",
        _ => "misc",
    }
}

/// Looks up only the built-in tables (no learned rules, no bump), for the
/// `/routing-rules/suggest` endpoint: "what would the classifier pick for
/// this extension/mime if I added no rule at all?"
pub fn suggest_builtin(extension: Option<&str>, mime_type: Option<&str>) -> Option<(String, String)> {
    if let Some(ext) = extension {
        let ext = if ext.starts_with('.') {
            ext.to_lowercase()
        } else {
            format!(".{}", ext.to_lowercase())
        };
        if let Some((cat, sub)) = builtin_by_extension(&ext) {
            return Some((cat.to_string(), sub.to_string()));
        }
    }
    if let Some(mime) = mime_type {
        if let Some((cat, sub)) = builtin_by_mime(mime) {
            return Some((cat.to_string(), sub.to_string()));
        }
    }
    None
}

pub struct UnrecognisedHint {
    pub filename: String,
    pub extension: Option<String>,
}

pub fn classify(
    rules: &RoutingRuleStore,
    filename: &str,
    mime_type: &str,
    sniffed_mime: Option<&str>,
) -> (Classification, Option<UnrecognisedHint>) {
    let extension = extension_of(filename);

    if let Some(rule) = rules.match_and_bump(extension.as_deref(), Some(mime_type)) {
        let mut parts = rule.destination.into_iter();
        let category = parts.next().unwrap_or_else(|| "other".into());
        let subcategory = parts.next().unwrap_or_else(|| "unknown".into());
        return (
            Classification {
                category,
                subcategory,
                unrecognised: false,
            },
            None,
        );
    }

    if let Some(ext) = &extension {
        if let Some((cat, sub)) = builtin_by_extension(ext) {
            return (
                Classification {
                    category: cat.into(),
                    subcategory: sub.into(),
                    unrecognised: false,
                },
                None,
            );
        }
    }

    let effective_mime = sniffed_mime.unwrap_or(mime_type);
    if let Some((cat, sub)) = builtin_by_mime(effective_mime) {
        return (
            Classification {
                category: cat.into(),
                subcategory: sub.into(),
                unrecognised: false,
            },
            None,
        );
    }

    (
        Classification {
            category: "other".into(),
            subcategory: "unknown".into(),
            unrecognised: true,
        },
        Some(UnrecognisedHint {
            filename: filename.to_string(),
            extension,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, RoutingRuleStore) {
        let dir = TempDir::new().unwrap();
        let store = RoutingRuleStore::load(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn builtin_extension_wins_over_generic_mime() {
        let (_dir, rules) = store();
        let (c, hint) = classify(&rules, "photo.jpg", "application/octet-stream", None);
        assert_eq!(c.path(), "images/jpg");
        assert!(hint.is_none());
    }

    #[test]
    fn unrecognised_extension_falls_back_to_other_unknown() {
        let (_dir, rules) = store();
        let (c, hint) = classify(&rules, "model.blend", "application/octet-stream", None);
        assert_eq!(c.path(), "other/unknown");
        assert!(c.unrecognised);
        let hint = hint.unwrap();
        assert_eq!(hint.extension.as_deref(), Some(".blend"));
    }

    #[test]
    fn learned_rule_overrides_builtin_and_other() {
        let (_dir, rules) = store();
        rules
            .add(Some(".blend".into()), None, vec!["3d".into(), "blender".into()])
            .unwrap();
        let (c, hint) = classify(&rules, "model2.blend", "application/octet-stream", None);
        assert_eq!(c.path(), "3d/blender");
        assert!(hint.is_none());
        assert_eq!(rules.list()[0].usage_count, 1);
    }

    #[test]
    fn mime_prefix_classifies_images() {
        let (_dir, rules) = store();
        let (c, _) = classify(&rules, "noext", "image/png", None);
        assert_eq!(c.category, "images");
    }
}
