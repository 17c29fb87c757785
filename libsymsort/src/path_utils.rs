//! String-level path manipulation for source paths found in symbol data. These paths come from
//! whatever machine produced the input, so we can't use `std::path`, which follows the conventions
//! of the host. Both `/` and `\` are treated as separators. Output always uses `/`.

const SEPARATORS: [char; 2] = ['/', '\\'];

pub(crate) fn is_separator(ch: char) -> bool {
    SEPARATORS.contains(&ch)
}

/// Whether `path` is absolute, either Unix-style or with a Windows drive letter.
pub fn is_rooted(path: &str) -> bool {
    let mut chars = path.chars();
    match (chars.next(), chars.next()) {
        (Some(first), _) if is_separator(first) => true,
        (Some(first), Some(':')) => first.is_ascii_alphabetic(),
        _ => false,
    }
}

/// Resolves `.` and `..` components and collapses repeated separators. `..` components that would
/// climb above the start of the path are kept. A leading or trailing separator is preserved.
#[must_use]
pub fn canonicalize(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }

    let mut components: Vec<&str> = Vec::new();
    let mut excess_parents = 0;
    for component in path.split(SEPARATORS).filter(|c| !c.is_empty()) {
        match component {
            "." => {}
            ".." => {
                if components.pop().is_none() {
                    excess_parents += 1;
                }
            }
            other => components.push(other),
        }
    }

    let mut out = String::with_capacity(path.len());
    if path.starts_with(SEPARATORS) {
        out.push('/');
    }
    for _ in 0..excess_parents {
        out.push_str("../");
    }
    for component in components {
        out.push_str(component);
        out.push('/');
    }
    if out.len() > 1 && !path.ends_with(SEPARATORS) {
        out.pop();
    }
    out
}

/// Returns everything before the last separator. The root of an absolute path is its own parent.
/// Returns an empty string if there's no separator.
#[must_use]
pub fn parent_directory(path: &str) -> &str {
    match path.rfind(SEPARATORS) {
        Some(0) => &path[..1],
        Some(index) => &path[..index],
        None => "",
    }
}

/// Joins `relative` onto `base`.
pub(crate) fn join(base: &str, relative: &str) -> String {
    if base.is_empty() {
        relative.to_owned()
    } else if base.ends_with(SEPARATORS) {
        format!("{base}{relative}")
    } else {
        format!("{base}/{relative}")
    }
}

/// Strips a trailing `:<line>` from a source location. Anything after the last colon that isn't a
/// line number, such as the rest of a path following a drive letter, is left alone.
#[must_use]
pub fn strip_line_number(location: &str) -> &str {
    match location.rsplit_once(':') {
        Some((path, line))
            if !path.is_empty() && !line.is_empty() && line.bytes().all(|b| b.is_ascii_digit()) =>
        {
            path
        }
        _ => location,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize("/a/b/../c/./d.cpp"), "/a/c/d.cpp");
        assert_eq!(canonicalize("a//b\\c.h"), "a/b/c.h");
        assert_eq!(canonicalize("../../x/y.cpp"), "../../x/y.cpp");
        assert_eq!(canonicalize("a/../../y.cpp"), "../y.cpp");
        assert_eq!(canonicalize("C:\\src\\lib\\..\\main.cpp"), "C:/src/main.cpp");
        assert_eq!(canonicalize("/a/b/"), "/a/b/");
        assert_eq!(canonicalize("/"), "/");
        assert_eq!(canonicalize(""), "");
    }

    #[test]
    fn test_is_rooted() {
        assert!(is_rooted("/usr/include/stdio.h"));
        assert!(is_rooted("\\src\\a.cpp"));
        assert!(is_rooted("c:\\src\\a.cpp"));
        assert!(!is_rooted("src/a.cpp"));
        assert!(!is_rooted("1:x"));
        assert!(!is_rooted(""));
    }

    #[test]
    fn test_parent_directory() {
        assert_eq!(parent_directory("/a/b/c.cpp"), "/a/b");
        assert_eq!(parent_directory("/c.cpp"), "/");
        assert_eq!(parent_directory("c.cpp"), "");
    }

    #[test]
    fn test_strip_line_number() {
        assert_eq!(strip_line_number("/src/a.cpp:42"), "/src/a.cpp");
        assert_eq!(strip_line_number("c:\\src\\a.cpp:7"), "c:\\src\\a.cpp");
        assert_eq!(strip_line_number("c:\\src\\a.cpp"), "c:\\src\\a.cpp");
        assert_eq!(strip_line_number("/src/a.cpp:"), "/src/a.cpp:");
        assert_eq!(strip_line_number(":12"), ":12");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/a/b", "c.cpp"), "/a/b/c.cpp");
        assert_eq!(join("/", "c.cpp"), "/c.cpp");
        assert_eq!(join("", "c.cpp"), "c.cpp");
    }
}
