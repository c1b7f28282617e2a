//! Static files and directory listings, the last resort of the [`Dispatcher`](crate::routing::Dispatcher).
//!
//! File contents are kept in a bounded in-memory cache.

use crate::prelude::*;
use moka::sync::Cache;
use std::fmt::Write as _;

/// The maximum total size of cached files.
pub const CACHE_CAPACITY: u64 = 64 * 1024 * 1024;
/// Files larger than this are read from disk every time.
pub const MAX_CACHED_FILE: usize = 4 * 1024 * 1024;
/// Cached files are re-read from disk after this time.
pub const CACHE_TIME_TO_LIVE: Duration = Duration::from_secs(60);

/// Reads `path`, through `cache`.
///
/// Returns [`None`] if the file doesn't exist or can't be read.
pub async fn read(path: &Path, cache: &Cache<PathBuf, Bytes>) -> Option<Bytes> {
    if let Some(file) = cache.get(path) {
        return Some(file);
    }
    let file = match tokio::fs::read(path).await {
        Ok(file) => Bytes::from(file),
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                warn!("Failed to read {}: {err}", path.display());
            }
            return None;
        }
    };
    if file.len() <= MAX_CACHED_FILE {
        cache.insert(path.to_path_buf(), Bytes::clone(&file));
    }
    Some(file)
}

/// Serves files from a public directory.
#[derive(Debug)]
pub struct Files {
    root: PathBuf,
    cache: Cache<PathBuf, Bytes>,
    lifetime: Duration,
    listing: bool,
}
impl Files {
    /// Serves the files under `root`, which clients may cache for `lifetime`.
    ///
    /// If `listing` is true, directories without a `index.html` are listed.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, lifetime: Duration, listing: bool) -> Self {
        let cache = Cache::builder()
            .max_capacity(CACHE_CAPACITY)
            .weigher(|_path: &PathBuf, file: &Bytes| u32::try_from(file.len()).unwrap_or(u32::MAX))
            .time_to_live(CACHE_TIME_TO_LIVE)
            .build();
        Self {
            root: root.into(),
            cache,
            lifetime,
            listing,
        }
    }
    /// The public directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
    /// Gets the path on the file system of `request`.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::ClientError`] if the path tries to leave the public directory.
    pub fn resolve(&self, request: &Request) -> Result<PathBuf, Error> {
        let path = request.path();
        if path.split('/').any(|segment| segment == "..") {
            return Err(Error::client("path contains `..`"));
        }
        let mut resolved = self.root.clone();
        let relative = path.trim_start_matches('/');
        if !relative.is_empty() {
            resolved.push(relative);
        }
        if let Some(extension) = request.extension() {
            let mut name = resolved.into_os_string();
            name.push(extension);
            resolved = PathBuf::from(name);
        }
        Ok(resolved)
    }

    /// Serves the file or directory of `request`.
    ///
    /// Returns [`None`] if nothing is found.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve`].
    pub async fn serve(&self, request: &Request) -> Result<Option<Answer>, Error> {
        let path = self.resolve(request)?;
        let metadata = tokio::fs::metadata(&path).await.ok();
        if metadata.as_ref().map_or(false, std::fs::Metadata::is_dir) {
            let index = path.join("index.html");
            if let Some(file) = read(&index, &self.cache).await {
                return Ok(Some(self.answer(&index, file)));
            }
            if self.listing {
                return Ok(Some(listing(&path, request.path()).await?));
            }
            return Ok(None);
        }
        if metadata.is_none() {
            return Ok(None);
        }
        Ok(read(&path, &self.cache)
            .await
            .map(|file| self.answer(&path, file)))
    }

    fn answer(&self, path: &Path, file: Bytes) -> Answer {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        Answer::new(file, content_type(&mime)).cache_for(self.lifetime)
    }
}

/// The `content-type` of `mime`. Text is assumed to be UTF-8.
fn content_type(mime: &Mime) -> CompactString {
    if mime.type_() == mime::TEXT && mime.get_param(mime::CHARSET).is_none() {
        format_compact!("{mime}; charset=utf-8")
    } else {
        mime.as_ref().into()
    }
}

/// Lists the entries of the directory `path`, which is shown to the client as `shown`.
///
/// # Errors
///
/// Returns [`ErrorKind::InternalServerError`] if the directory can't be read.
pub async fn listing(path: &Path, shown: &str) -> Result<Answer, Error> {
    let mut entries = tokio::fs::read_dir(path).await.map_err(|err| {
        Error::internal(format_compact!(
            "failed to list {}: {err}",
            path.display()
        ))
    })?;
    let mut names = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await.map_or(false, |kind| kind.is_dir()) {
            name.push('/');
        }
        names.push(name);
    }
    names.sort_unstable();

    let base = if shown.ends_with('/') {
        shown.to_owned()
    } else {
        format!("{shown}/")
    };
    let shown = utils::escape_markup(shown);
    let mut page = String::with_capacity(256 + names.len() * 64);
    let _ = write!(
        page,
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Index of {shown}</title></head>\
        <body><h1>Index of {shown}</h1><ul>"
    );
    for name in &names {
        let href = format!("{base}{name}");
        let _ = write!(
            page,
            "<li><a href=\"{}\">{}</a></li>",
            utils::escape_markup(&href),
            utils::escape_markup(name)
        );
    }
    page.push_str("</ul></body></html>");
    Ok(Answer::new(page, "text/html; charset=utf-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::tests::get;

    fn public() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hearth-files-{}", rand::random::<u64>()));
        std::fs::create_dir_all(dir.join("docs")).unwrap();
        std::fs::write(dir.join("style.css"), "body{}").unwrap();
        std::fs::write(dir.join("docs").join("a.txt"), "a").unwrap();
        std::fs::write(dir.join("index.html"), "<h1>hi</h1>").unwrap();
        dir
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type(&mime::IMAGE_PNG), "image/png");
        assert_eq!(content_type(&mime::TEXT_CSS), "text/css; charset=utf-8");
        assert_eq!(
            content_type(&mime::TEXT_HTML_UTF_8),
            "text/html; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn serving() {
        let root = public();
        let files = Files::new(&root, Duration::from_secs(3600), true);

        let css = files.serve(&get("/style.css")).await.unwrap().unwrap();
        assert_eq!(css.content(), "body{}");
        assert_eq!(css.content_type(), "text/css; charset=utf-8");

        let index = files.serve(&get("/")).await.unwrap().unwrap();
        assert_eq!(index.content(), "<h1>hi</h1>");
        assert!(index.content_type().starts_with("text/html"));

        let listing = files.serve(&get("/docs")).await.unwrap().unwrap();
        let page = str::from_utf8(listing.content()).unwrap();
        assert!(page.contains("<a href=\"/docs/a.txt\">a.txt</a>"));

        assert!(files.serve(&get("/missing.css")).await.unwrap().is_none());
        let error = files.serve(&get("/docs/../../etc")).await;
        assert_eq!(error.unwrap_err().kind(), ErrorKind::ClientError);

        let no_listing = Files::new(&root, Duration::from_secs(1), false);
        assert!(no_listing.serve(&get("/docs")).await.unwrap().is_none());

        std::fs::remove_dir_all(root).unwrap();
    }
}
