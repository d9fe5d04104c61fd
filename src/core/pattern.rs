//! 忽略 / 包含规则匹配
//!
//! 三类规则：
//! - 以 `/` 结尾：仅匹配目录本身及其子路径
//! - 含通配符（`*`、`?`、`[`）：按 shell glob 匹配路径最后一段
//! - 普通规则：全路径相等、路径以 `/规则` 结尾，或任一上级目录名与规则相同
//!
//! 匹配区分大小写，路径统一使用 `/` 分隔。

use regex::Regex;

/// 编译后的单条规则
#[derive(Debug, Clone)]
pub enum Pattern {
    /// 目录规则（已去掉结尾的 `/`）
    Directory(String),
    /// 通配符规则；`regex` 为 None 表示 glob 无法编译，退化为子串匹配
    Wildcard {
        raw: String,
        regex: Option<Regex>,
    },
    /// 普通名称或路径
    Plain(String),
}

impl Pattern {
    pub fn parse(pattern: &str) -> Self {
        let pattern = normalize_path(pattern);

        if let Some(dir) = pattern.strip_suffix('/') {
            return Pattern::Directory(dir.trim_end_matches('/').to_string());
        }

        if has_wildcard(&pattern) {
            let regex = glob_to_regex(&pattern);
            return Pattern::Wildcard {
                raw: pattern,
                regex,
            };
        }

        Pattern::Plain(pattern)
    }

    pub fn matches(&self, path: &str, is_dir: bool) -> bool {
        let path = normalize_path(path);
        if path.is_empty() {
            return false;
        }

        match self {
            Pattern::Directory(dir) => {
                if !is_dir || dir.is_empty() {
                    return false;
                }
                path == *dir || path.starts_with(&format!("{}/", dir))
            }
            Pattern::Wildcard { raw, regex } => {
                let name = file_name(&path);
                match regex {
                    Some(re) => re.is_match(name),
                    None => {
                        let literal: String =
                            raw.chars().filter(|c| !is_wildcard_char(*c)).collect();
                        !literal.is_empty() && path.contains(&literal)
                    }
                }
            }
            Pattern::Plain(p) => {
                if p.is_empty() {
                    return false;
                }
                if path == *p || path.ends_with(&format!("/{}", p)) {
                    return true;
                }
                // 上级目录名命中（多段规则按整段前缀 / 中段匹配）
                if p.contains('/') {
                    return path.starts_with(&format!("{}/", p))
                        || path.contains(&format!("/{}/", p));
                }
                let mut segments: Vec<&str> = path.split('/').collect();
                segments.pop();
                segments.iter().any(|s| s == p)
            }
        }
    }
}

/// 按规则文本直接匹配（每次调用都会编译规则）
pub fn matches(pattern: &str, path: &str, is_dir: bool) -> bool {
    Pattern::parse(pattern).matches(path, is_dir)
}

/// 任意一条忽略规则命中即忽略
pub fn should_ignore<S: AsRef<str>>(path: &str, patterns: &[S], is_dir: bool) -> bool {
    patterns
        .iter()
        .any(|p| matches(p.as_ref(), path, is_dir))
}

/// 包含规则为空、目录、或命中任意一条包含规则时保留
pub fn should_include<S: AsRef<str>>(path: &str, patterns: &[S], is_dir: bool) -> bool {
    if patterns.is_empty() || is_dir {
        return true;
    }
    patterns
        .iter()
        .any(|p| matches(p.as_ref(), path, is_dir))
}

/// 一组忽略 + 包含规则（预编译）
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    ignore: Vec<Pattern>,
    include: Vec<Pattern>,
}

impl FilterSet {
    pub fn new<S: AsRef<str>>(ignore: &[S], include: &[S]) -> Self {
        let compile = |patterns: &[S]| -> Vec<Pattern> {
            patterns
                .iter()
                .map(|p| p.as_ref().trim())
                .filter(|p| !p.is_empty())
                .map(Pattern::parse)
                .collect()
        };
        Self {
            ignore: compile(ignore),
            include: compile(include),
        }
    }

    /// 不做任何过滤
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn should_ignore(&self, path: &str, is_dir: bool) -> bool {
        self.ignore.iter().any(|p| p.matches(path, is_dir))
    }

    pub fn should_include(&self, path: &str, is_dir: bool) -> bool {
        if self.include.is_empty() || is_dir {
            return true;
        }
        self.include.iter().any(|p| p.matches(path, is_dir))
    }

    /// 文件或目录是否被排除（忽略或未包含）
    pub fn is_excluded(&self, path: &str, is_dir: bool) -> bool {
        self.should_ignore(path, is_dir) || !self.should_include(path, is_dir)
    }
}

/// 统一分隔符并去掉开头的 `./` 与 `/`
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut trimmed = path.as_str();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    trimmed.trim_start_matches('/').to_string()
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_wildcard_char(c: char) -> bool {
    matches!(c, '*' | '?')
}

fn has_wildcard(pattern: &str) -> bool {
    pattern.chars().any(|c| is_wildcard_char(c) || c == '[')
}

/// 把 shell glob 转成锚定的正则；语法错误（如未闭合的 `[`）返回 None
fn glob_to_regex(glob: &str) -> Option<Regex> {
    let mut re = String::from("^");
    let mut chars = glob.chars();

    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                let mut first = true;
                for c in chars.by_ref() {
                    match c {
                        '!' | '^' if first => class.push('^'),
                        ']' if !first => {
                            closed = true;
                            break;
                        }
                        '\\' => class.push_str("\\\\"),
                        '[' => class.push_str("\\["),
                        _ => class.push(c),
                    }
                    first = false;
                }
                if !closed || class.is_empty() || class == "^" {
                    return None;
                }
                re.push('[');
                re.push_str(&class);
                re.push(']');
            }
            '\\' => {
                let escaped = chars.next()?;
                re.push_str(&regex::escape(&escaped.to_string()));
            }
            _ => re.push_str(&regex::escape(&c.to_string())),
        }
    }

    re.push('$');
    Regex::new(&re).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_pattern_only_matches_directories() {
        let ignore = ["dir/"];
        assert!(should_ignore("dir", &ignore, true));
        assert!(should_ignore("dir/sub", &ignore, true));
        assert!(!should_ignore("dir", &ignore, false));
        assert!(!should_ignore("dir/file.txt", &ignore, false));
        assert!(!should_ignore("dirt", &ignore, true));
        assert!(!should_ignore("other/dir", &ignore, true));
    }

    #[test]
    fn test_wildcard_matches_final_segment() {
        assert!(matches("*.tmp", "a.tmp", false));
        assert!(matches("*.tmp", "deep/nested/b.tmp", false));
        assert!(!matches("*.tmp", "a.tmp.txt", false));
        assert!(matches("file?.log", "logs/file1.log", false));
        assert!(!matches("file?.log", "logs/file10.log", false));
        // `*` 不跨越分隔符
        assert!(!matches("a*b", "a/b", false));
    }

    #[test]
    fn test_character_class() {
        assert!(matches("[ab].txt", "a.txt", false));
        assert!(!matches("[ab].txt", "c.txt", false));
        assert!(matches("[!ab].txt", "c.txt", false));
    }

    #[test]
    fn test_broken_glob_falls_back_to_substring() {
        // 未闭合的字符类无法编译，退化为去掉通配符后的子串匹配
        assert!(matches("[abc*", "x/[abc.log", false));
        assert!(!matches("[abc*", "x/abc.log", false));
    }

    #[test]
    fn test_plain_pattern_matches_name_anywhere() {
        assert!(matches("node_modules", "node_modules", true));
        assert!(matches("node_modules", "web/node_modules", true));
        assert!(matches("node_modules", "web/node_modules/lib/index.js", false));
        assert!(matches(".DS_Store", "photos/.DS_Store", false));
        assert!(!matches("node_modules", "node_modules_backup", true));
        assert!(matches("docs/tmp", "docs/tmp/a.txt", false));
    }

    #[test]
    fn test_case_sensitive_and_separator_normalized() {
        assert!(!matches("Thumbs.db", "thumbs.db", false));
        assert!(matches("a/b", "a\\b", false));
        assert!(matches("build/", "./build", true));
    }

    #[test]
    fn test_include_rules() {
        let include = ["*.md"];
        assert!(should_include("notes/readme.md", &include, false));
        assert!(!should_include("notes/readme.txt", &include, false));
        assert!(should_include("notes", &include, true));
        assert!(should_include("anything", &[] as &[&str], false));
    }

    #[test]
    fn test_filter_set_skips_blank_patterns() {
        let filter = FilterSet::new(&["", "  ", "*.tmp"], &[]);
        assert!(filter.should_ignore("a.tmp", false));
        assert!(!filter.should_ignore("a.txt", false));

        let filter = FilterSet::new(&[] as &[&str], &["", " "]);
        assert!(filter.should_include("a.txt", false));
    }

    #[test]
    fn test_is_excluded() {
        let filter = FilterSet::new(&["*.tmp"], &["*.md"]);
        assert!(filter.is_excluded("a.tmp", false));
        assert!(filter.is_excluded("a.txt", false));
        assert!(!filter.is_excluded("a.md", false));
        assert!(!filter.is_excluded("docs", true));
    }
}
