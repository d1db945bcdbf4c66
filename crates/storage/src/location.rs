use std::path::{Path, PathBuf};

/// Where a SQLite database lives, parsed from a connection URL or a bare path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Private to the connection that opened it.
    Memory(String),
    File {
        path: PathBuf,
        query: Option<String>,
    },
    /// Anything we do not interpret; handed to sqlx unchanged.
    Opaque(String),
}

impl DatabaseLocation {
    /// Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.starts_with("sqlite::memory:") || raw.contains("mode=memory") {
            return Some(Self::Memory(raw.to_string()));
        }

        let rest = match raw
            .strip_prefix("sqlite://")
            .or_else(|| raw.strip_prefix("sqlite:"))
        {
            Some(rest) => rest,
            None if raw.contains("://") => return Some(Self::Opaque(raw.to_string())),
            None => raw,
        };

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (rest, None),
        };
        if path.is_empty() {
            return Some(Self::Opaque(raw.to_string()));
        }

        Some(Self::File {
            path: PathBuf::from(path.replace('\\', "/")),
            query,
        })
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory(_))
    }

    pub fn file_path(&self) -> Option<&Path> {
        match self {
            Self::File { path, .. } => Some(path),
            Self::Memory(_) | Self::Opaque(_) => None,
        }
    }

    /// Canonical `sqlite://` form accepted by `SqliteConnectOptions`.
    pub fn to_url(&self) -> String {
        match self {
            Self::File { path, query } => {
                let mut url = format!("sqlite://{}", path.to_string_lossy());
                if let Some(query) = query {
                    url.push('?');
                    url.push_str(query);
                }
                url
            }
            Self::Memory(url) | Self::Opaque(url) => url.clone(),
        }
    }
}

#[cfg(test)]
#[path = "tests/location_tests.rs"]
mod tests;
