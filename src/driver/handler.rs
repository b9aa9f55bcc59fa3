//! Static directory handler
//!
//! Serves a plain-text listing for directories and raw contents for files
//! under one root directory.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;
use tracing::warn;

use super::RequestHandler;
use crate::http::{HttpRequest, HttpResponse, Method, Status};
use crate::tls::PeerCertificateInfo;

/// Serve the files below `root`, read-only
#[derive(Debug, Clone)]
pub struct DirectoryListing {
    root: PathBuf,
}

impl DirectoryListing {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryListing { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a percent-encoded request path below the root, refusing anything
    /// that would climb out of it once decoded
    fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let decoded = percent_decode_str(request_path.trim_start_matches('/'))
            .decode_utf8()
            .ok()?;
        let mut resolved = self.root.clone();

        for component in Path::new(&*decoded).components() {
            match component {
                // Reject parts like `c:` that are not plain names on their own
                Component::Normal(part)
                    if Path::new(part)
                        .components()
                        .all(|c| matches!(c, Component::Normal(_))) =>
                {
                    resolved.push(part)
                }
                Component::Normal(_) => return None,
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }

        Some(resolved)
    }

    fn listing(&self, dir: &Path, request_path: &str) -> io::Result<String> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();

        let mut body = format!("Directory listing for {}\n\n", request_path);
        for name in names {
            body.push_str(&name);
            body.push('\n');
        }
        Ok(body)
    }
}

impl RequestHandler for DirectoryListing {
    fn handle(&self, request: &HttpRequest, _peer: Option<&PeerCertificateInfo>) -> HttpResponse {
        if !matches!(request.method(), Method::Get | Method::Head) {
            let mut response =
                HttpResponse::text(Status::METHOD_NOT_ALLOWED, "Method not allowed\n");
            response.headers_mut().set("Allow", "GET, HEAD");
            return response;
        }

        let path = request.path();
        let Some(fs_path) = self.resolve(path) else {
            return HttpResponse::text(Status::FORBIDDEN, "Forbidden\n");
        };

        let result = match fs::metadata(&fs_path) {
            Ok(meta) if meta.is_dir() => self.listing(&fs_path, path).map(|body| {
                HttpResponse::text(Status::OK, body)
            }),
            Ok(_) => fs::read(&fs_path).map(|contents| {
                HttpResponse::builder()
                    .status(Status::OK)
                    .header("Content-Type", "application/octet-stream")
                    .body(contents)
                    .build()
            }),
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => response,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                HttpResponse::text(Status::NOT_FOUND, "Not found\n")
            }
            Err(e) => {
                warn!(path = %fs_path.display(), error = %e, "failed to read");
                HttpResponse::text(Status::INTERNAL_SERVER_ERROR, "Internal server error\n")
            }
        }
    }
}
