//! Lexical path confinement and classification.
//!
//! Nothing here touches the filesystem. Symlink resolution happens in the
//! guardrail layer on top of these results.

use std::path::{Component, Path, PathBuf};

/// Where a confined path lands relative to the orchestrator's own files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    /// Ordinary project file.
    Workspace,
    /// `.baton/tasks.json`; writes are diffed against the registry.
    Registry,
    /// Journal, config, session logs, anything else under `.baton/`, and `.git/`.
    Protected,
}

/// Join `raw` onto `base` (when relative) and fold `.` and `..` components.
///
/// `..` at the filesystem root stays at the root, matching the kernel.
pub fn normalize_lexical(base: &Path, raw: &Path) -> PathBuf {
    let joined = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        base.join(raw)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !matches!(
                    out.components().next_back(),
                    Some(Component::RootDir | Component::Prefix(_)) | None
                ) {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// True when `path` equals `root` or lies beneath it (component-wise).
pub fn is_within(root: &Path, path: &Path) -> bool {
    path.starts_with(root)
}

/// Classify a path already confined to `root`.
pub fn classify(root: &Path, path: &Path) -> PathClass {
    let Ok(relative) = path.strip_prefix(root) else {
        return PathClass::Protected;
    };
    let mut components = relative.components();
    match components.next() {
        Some(Component::Normal(first)) if first == ".git" => PathClass::Protected,
        Some(Component::Normal(first)) if first == ".baton" => {
            let rest: Vec<_> = components.collect();
            match rest.as_slice() {
                [Component::Normal(name)] if *name == "tasks.json" => PathClass::Registry,
                _ => PathClass::Protected,
            }
        }
        _ => PathClass::Workspace,
    }
}

/// Shell words that name a path outside the working directory's subtree:
/// absolute paths, home-relative paths, and anything containing `..`.
///
/// Quotes are stripped and `--flag=value` words contribute their value. The
/// scan is conservative: it does not understand shell grammar beyond
/// splitting on whitespace and control operators.
pub fn shell_path_tokens(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in command.split(|c: char| c.is_whitespace() || ";|&<>()`".contains(c)) {
        let word = word.trim_matches(|c| c == '"' || c == '\'');
        let candidate = match word.split_once('=') {
            Some((_, value)) if word.starts_with('-') || !value.is_empty() => value,
            _ => word,
        };
        let candidate = candidate.trim_matches(|c| c == '"' || c == '\'');
        if candidate.is_empty() {
            continue;
        }
        if candidate.starts_with('/') || candidate.starts_with('~') || has_parent_dir(candidate) {
            tokens.push(candidate.to_string());
        }
    }
    tokens
}

/// The first shell expansion in `command` that would build a path at run time.
///
/// Parameter and command substitution (`$`, backticks) and history or brace
/// tricks cannot be resolved lexically, so any occurrence is reported, quoted
/// or not.
pub fn shell_expansion(command: &str) -> Option<&'static str> {
    if command.contains('`') {
        return Some("`");
    }
    if command.contains('$') {
        return Some("$");
    }
    None
}

fn has_parent_dir(raw: &str) -> bool {
    Path::new(raw)
        .components()
        .any(|component| matches!(component, Component::ParentDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_dots() {
        let root = Path::new("/work/app");
        assert_eq!(
            normalize_lexical(root, Path::new("src/./lib/../main.rs")),
            PathBuf::from("/work/app/src/main.rs")
        );
        assert_eq!(
            normalize_lexical(root, Path::new("../../etc/passwd")),
            PathBuf::from("/etc/passwd")
        );
        assert_eq!(
            normalize_lexical(root, Path::new("/../../tmp")),
            PathBuf::from("/tmp")
        );
    }

    #[test]
    fn within_is_component_wise() {
        let root = Path::new("/work/app");
        assert!(is_within(root, Path::new("/work/app")));
        assert!(is_within(root, Path::new("/work/app/src/a.rs")));
        assert!(!is_within(root, Path::new("/work/apple/a.rs")));
        assert!(!is_within(root, Path::new("/work")));
    }

    #[test]
    fn classify_orchestrator_files() {
        let root = Path::new("/w");
        assert_eq!(classify(root, Path::new("/w/src/a.rs")), PathClass::Workspace);
        assert_eq!(classify(root, Path::new("/w/init.sh")), PathClass::Workspace);
        assert_eq!(
            classify(root, Path::new("/w/.baton/tasks.json")),
            PathClass::Registry
        );
        for protected in [
            "/w/.baton/progress.jsonl",
            "/w/.baton/config.toml",
            "/w/.baton/sessions/3/meta.json",
            "/w/.baton",
            "/w/.git/HEAD",
        ] {
            assert_eq!(classify(root, Path::new(protected)), PathClass::Protected, "{protected}");
        }
        assert_eq!(
            classify(root, Path::new("/w/docs/.baton/tasks.json")),
            PathClass::Workspace
        );
    }

    #[test]
    fn shell_tokens_pick_escaping_words() {
        let tokens = shell_path_tokens(
            "cat /etc/passwd && ls ../sibling; npm test --prefix=../x > out.txt; echo 'a=b'",
        );
        assert_eq!(tokens, vec!["/etc/passwd", "../sibling", "../x"]);
    }

    #[test]
    fn shell_expansion_is_detected() {
        assert_eq!(shell_expansion("npm test && ls src"), None);
        assert_eq!(shell_expansion("echo pwned > \"$HOME/x\""), Some("$"));
        assert_eq!(shell_expansion("P=$(dirname \"$PWD\")"), Some("$"));
        assert_eq!(shell_expansion("cat `echo /etc/passwd`"), Some("`"));
    }

    #[test]
    fn shell_tokens_ignore_plain_relative_words() {
        assert!(shell_path_tokens("cargo test -p app src/lib.rs").is_empty());
        assert_eq!(shell_path_tokens("cd ~ && ls"), vec!["~"]);
    }
}
