use std::path::{Path, PathBuf};

use crate::ei::*;

/// Resolves a path from the configuration file relative to the directory of
/// that file. Absolute paths are kept as is.
pub fn resolve_path(root: &Path, file_path: &str) -> String {
    let p: PathBuf = [root, Path::new(file_path)].iter().collect();
    p.as_path().display().to_string()
}

pub fn simplify_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string()
}

/// The index of a column, by header name or by default position.
pub fn find_column<'a, I>(
    header: I,
    name: &Option<String>,
    default_idx: usize,
    path: &str,
) -> EiResult<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    match name {
        None => Ok(default_idx),
        Some(n) => {
            let needle = n.trim().to_lowercase();
            header
                .into_iter()
                .position(|h| h.trim().to_lowercase() == needle)
                .context(MissingColumnSnafu {
                    path,
                    column: n.clone(),
                })
        }
    }
}

/// Parses a registration or vote count. Spreadsheets often export counts
/// as `1,234` or `12.0`.
pub fn parse_count(s: &str) -> Option<i64> {
    let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
    if let Ok(x) = cleaned.parse::<i64>() {
        return Some(x);
    }
    // Whole floats only, within the i64 range (2^63 itself is out).
    match cleaned.parse::<f64>() {
        Ok(f)
            if f.is_finite()
                && f.fract() == 0.0
                && f >= i64::MIN as f64
                && f < i64::MAX as f64 =>
        {
            Some(f as i64)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths() {
        assert_eq!(
            resolve_path(Path::new("/data/2024"), "results.json"),
            "/data/2024/results.json"
        );
        assert_eq!(resolve_path(Path::new("/data/2024"), "/tmp/r.json"), "/tmp/r.json");
        assert_eq!(simplify_file_name("/data/2024/results.json"), "results.json");
    }

    #[test]
    fn columns() {
        let header = vec!["Precinct", " Registered Voters "];
        assert_eq!(find_column(header.clone(), &None, 1, "f.csv").unwrap(), 1);
        assert_eq!(
            find_column(header.clone(), &Some("registered voters".to_string()), 0, "f.csv")
                .unwrap(),
            1
        );
        assert!(matches!(
            find_column(header, &Some("active".to_string()), 0, "f.csv"),
            Err(EiError::MissingColumn { .. })
        ));
    }

    #[test]
    fn counts() {
        assert_eq!(parse_count("1,234"), Some(1234));
        assert_eq!(parse_count(" 12.0"), Some(12));
        assert_eq!(parse_count("-3"), Some(-3));
        assert_eq!(parse_count("12.5"), None);
        assert_eq!(parse_count(""), None);
    }

    #[test]
    fn counts_out_of_range() {
        assert_eq!(parse_count("1e30"), None);
        assert_eq!(parse_count("-1e30"), None);
        assert_eq!(parse_count("9223372036854775808"), None);
        assert_eq!(parse_count("9223372036854775808.0"), None);
        assert_eq!(parse_count("9223372036854775807"), Some(i64::MAX));
        assert_eq!(parse_count("1e3"), Some(1000));
    }
}
