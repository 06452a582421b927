//! Loading of the ranked target set.
//!
//! Targets are read from one column of a CSV file. Their order in the file defines their rank:
//! the first row is the most popular target.

use std::io;
use std::path::Path;

use url::Url;

use crate::error::{Error, Result};

/// Name of the column holding target URLs unless configured otherwise.
pub const DEFAULT_COLUMN: &str = "URL";

/// Loads at most `limit` targets from `column` of the CSV file at `path`.
pub fn load_targets(path: &Path, column: &str, limit: Option<usize>) -> Result<Vec<Url>> {
    let file = std::fs::File::open(path)?;
    let targets = read_targets(file, column, limit)?;
    tracing::debug!(path = %path.display(), count = targets.len(), "loaded targets");
    Ok(targets)
}

/// Reads at most `limit` targets from `column` of CSV data.
///
/// Blank cells are skipped. Every other cell must be an absolute URL.
pub fn read_targets<R: io::Read>(
    reader: R,
    column: &str,
    limit: Option<usize>,
) -> Result<Vec<Url>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let idx = reader
        .headers()?
        .iter()
        .position(|header| header.trim() == column)
        .ok_or_else(|| Error::InvalidConfig(format!("target column `{column}` not found")))?;

    let mut targets = Vec::new();
    for row in reader.records() {
        if limit.is_some_and(|limit| targets.len() >= limit) {
            break;
        }

        let row = row?;
        let Some(value) = row.get(idx).map(str::trim).filter(|value| !value.is_empty()) else {
            continue;
        };

        let url = Url::parse(value).map_err(|cause| Error::InvalidTarget {
            url: value.to_owned(),
            cause,
        })?;
        targets.push(url);
    }

    if targets.is_empty() {
        return Err(Error::EmptyTargets);
    }

    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATA: &str = "\
id,URL,comment
1,http://a.example/,first
2, https://b.example/page ,second
3,,blank
4,http://c.example/x?y=1,third
";

    fn read(data: &str, column: &str, limit: Option<usize>) -> Result<Vec<String>> {
        read_targets(data.as_bytes(), column, limit)
            .map(|targets| targets.into_iter().map(String::from).collect())
    }

    #[test]
    fn reads_column_in_order() {
        assert_eq!(
            read(DATA, DEFAULT_COLUMN, None).unwrap(),
            [
                "http://a.example/",
                "https://b.example/page",
                "http://c.example/x?y=1"
            ]
        );
    }

    #[test]
    fn honors_limit() {
        assert_eq!(
            read(DATA, DEFAULT_COLUMN, Some(2)).unwrap(),
            ["http://a.example/", "https://b.example/page"]
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            read(DATA, "url", None),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            read("URL\n\n", DEFAULT_COLUMN, None),
            Err(Error::EmptyTargets)
        ));
        assert!(matches!(
            read("URL\n /relative \n", DEFAULT_COLUMN, None),
            Err(Error::InvalidTarget { url, cause: url::ParseError::RelativeUrlWithoutBase })
                if url == "/relative"
        ));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.csv");
        std::fs::write(&path, DATA).unwrap();

        assert_eq!(load_targets(&path, "URL", Some(1)).unwrap().len(), 1);
        assert!(load_targets(&dir.path().join("missing.csv"), "URL", None).is_err());
    }
}
