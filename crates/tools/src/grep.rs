//! Concurrent content search over a directory tree.
//!
//! A breadth-first walker feeds candidate files into a channel; a pool of
//! worker tasks scans them with a regex compiled once up front; a collector
//! caps the global result count. Results are ordered by descending file
//! modification time, then ascending line number.

use regex::Regex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Search configuration.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Regex pattern to search for
    pub pattern: String,
    pub case_sensitive: bool,
    /// Context lines shown before and after each match
    pub context_lines: usize,
    /// Global cap on collected matches
    pub max_results: usize,
    /// Glob patterns for files to include (empty = all)
    pub include_patterns: Vec<String>,
    /// Glob patterns for files to exclude
    pub exclude_patterns: Vec<String>,
    /// Directory names skipped entirely
    pub exclude_dirs: Vec<String>,
    pub max_depth: usize,
    /// Worker pool size
    pub workers: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            case_sensitive: true,
            context_lines: 0,
            max_results: 1000,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            exclude_dirs: vec![
                ".git".into(),
                ".svn".into(),
                ".hg".into(),
                "node_modules".into(),
                "vendor".into(),
                "target".into(),
                "build".into(),
                "dist".into(),
                ".vscode".into(),
            ],
            max_depth: 50,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

/// A single matching line with its context.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub path: PathBuf,
    pub total_lines: usize,
    pub line_number: usize,
    pub line: String,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
    pub modified: SystemTime,
}

pub struct ContentSearcher {
    config: SearchConfig,
    regex: Arc<Regex>,
}

impl ContentSearcher {
    /// Compile the pattern once; an invalid regex is an error here, not at
    /// scan time.
    pub fn new(config: SearchConfig) -> Result<Self, String> {
        let pattern = if config.case_sensitive {
            config.pattern.clone()
        } else {
            format!("(?i){}", config.pattern)
        };

        let regex = Regex::new(&pattern).map_err(|e| format!("invalid regex pattern: {e}"))?;

        Ok(Self {
            config,
            regex: Arc::new(regex),
        })
    }

    /// Search the tree rooted at `root`, returning at most
    /// `config.max_results` matches sorted by file mtime (descending) then
    /// line number (ascending).
    pub async fn search(&self, root: &Path) -> Vec<MatchResult> {
        let (file_tx, file_rx) = mpsc::channel::<PathBuf>(100);
        let (result_tx, mut result_rx) = mpsc::channel::<MatchResult>(100);
        let file_rx = Arc::new(Mutex::new(file_rx));

        // Walker: BFS over the tree, feeding candidate files
        let walker_config = self.config.clone();
        let walk_root = root.to_path_buf();
        tokio::spawn(async move {
            walk_files(&walk_root, &walker_config, file_tx).await;
        });

        // Worker pool: scan files concurrently
        for _ in 0..self.config.workers.max(1) {
            let rx = Arc::clone(&file_rx);
            let tx = result_tx.clone();
            let regex = Arc::clone(&self.regex);
            let context_lines = self.config.context_lines;
            tokio::spawn(async move {
                loop {
                    let path = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(path) = path else { break };
                    if search_in_file(&path, &regex, context_lines, &tx).await.is_err() {
                        // collector gone, stop scanning
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        // Collector: cap the global result count
        let mut results = Vec::new();
        while let Some(result) = result_rx.recv().await {
            results.push(result);
            if results.len() >= self.config.max_results {
                break;
            }
        }

        results.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then(a.line_number.cmp(&b.line_number))
        });
        results.truncate(self.config.max_results);

        debug!(matches = results.len(), "Content search complete");
        results
    }
}

/// Breadth-first traversal feeding matching file paths into the channel.
async fn walk_files(root: &Path, config: &SearchConfig, file_tx: mpsc::Sender<PathBuf>) {
    let mut queue: VecDeque<(PathBuf, usize)> = VecDeque::new();
    queue.push_back((root.to_path_buf(), 0));

    while let Some((dir, depth)) = queue.pop_front() {
        if depth > config.max_depth {
            continue;
        }

        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();

            let Ok(file_type) = entry.file_type().await else {
                continue;
            };

            if file_type.is_dir() {
                if !config.exclude_dirs.iter().any(|d| d == &name) {
                    queue.push_back((path, depth + 1));
                }
                continue;
            }

            if !should_include(&name, config) {
                continue;
            }

            if file_tx.send(path).await.is_err() {
                return; // workers gone
            }
        }
    }
}

fn should_include(file_name: &str, config: &SearchConfig) -> bool {
    for pattern in &config.exclude_patterns {
        if glob::Pattern::new(pattern).is_ok_and(|p| p.matches(file_name)) {
            return false;
        }
    }

    if config.include_patterns.is_empty() {
        return true;
    }

    config
        .include_patterns
        .iter()
        .any(|pattern| glob::Pattern::new(pattern).is_ok_and(|p| p.matches(file_name)))
}

/// Scan one file, emitting a result per matching line. Binary and
/// unreadable files are skipped silently.
async fn search_in_file(
    path: &Path,
    regex: &Regex,
    context_lines: usize,
    result_tx: &mpsc::Sender<MatchResult>,
) -> Result<(), ()> {
    let Ok(content) = tokio::fs::read_to_string(path).await else {
        return Ok(());
    };
    let Ok(metadata) = tokio::fs::metadata(path).await else {
        return Ok(());
    };
    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

    let lines: Vec<&str> = content.lines().collect();

    for (i, line) in lines.iter().enumerate() {
        if !regex.is_match(line) {
            continue;
        }

        let before_start = i.saturating_sub(context_lines);
        let after_end = (i + 1 + context_lines).min(lines.len());

        let result = MatchResult {
            path: path.to_path_buf(),
            total_lines: lines.len(),
            line_number: i + 1,
            line: line.to_string(),
            context_before: lines[before_start..i].iter().map(|s| s.to_string()).collect(),
            context_after: lines[i + 1..after_end].iter().map(|s| s.to_string()).collect(),
            modified,
        };

        result_tx.send(result).await.map_err(|_| ())?;
    }

    Ok(())
}

/// Render results for the model: per-file headers, numbered lines with
/// context, and a match count footer.
pub fn format_results(results: &[MatchResult]) -> String {
    if results.is_empty() {
        return "No matches found".into();
    }

    let mut output = String::new();
    let mut current_file: Option<&Path> = None;
    let mut files = std::collections::HashSet::new();

    for result in results {
        files.insert(&result.path);

        if current_file != Some(result.path.as_path()) {
            current_file = Some(result.path.as_path());
            output.push_str(&format!(
                "{} total_lines: {}\n",
                result.path.display(),
                result.total_lines
            ));
        }

        for (offset, line) in result.context_before.iter().enumerate() {
            let num = result.line_number - result.context_before.len() + offset;
            output.push_str(&format!("{num}-{line}\n"));
        }
        output.push_str(&format!("{}:{}\n", result.line_number, result.line));
        for (offset, line) in result.context_after.iter().enumerate() {
            let num = result.line_number + offset + 1;
            output.push_str(&format!("{num}-{line}\n"));
        }

        if !result.context_before.is_empty() || !result.context_after.is_empty() {
            output.push_str("--\n");
        }
    }

    output.push_str(&format!(
        "\nFound {} matches in {} files\n",
        results.len(),
        files.len()
    ));
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pattern: &str) -> SearchConfig {
        SearchConfig {
            pattern: pattern.into(),
            ..SearchConfig::default()
        }
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn finds_matches_across_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "nothing here\nneedle found\nmore text");
        write(dir.path(), "b.txt", "needle at top\nplain line");
        write(dir.path(), "c.txt", "no match at all");

        let searcher = ContentSearcher::new(config("needle")).unwrap();
        let results = searcher.search(dir.path()).await;
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn respects_max_results() {
        let dir = tempfile::tempdir().unwrap();
        let content = (0..20).map(|i| format!("match line {i}")).collect::<Vec<_>>().join("\n");
        write(dir.path(), "big.txt", &content);

        let mut cfg = config("match");
        cfg.max_results = 5;
        let searcher = ContentSearcher::new(cfg).unwrap();
        let results = searcher.search(dir.path()).await;
        assert_eq!(results.len(), 5);
    }

    #[tokio::test]
    async fn results_sorted_by_mtime_then_line() {
        let dir = tempfile::tempdir().unwrap();
        let old = write(dir.path(), "old.txt", "hit one\nhit two");
        let new = write(dir.path(), "new.txt", "hit three");

        // Make the old file clearly older
        let past = SystemTime::now() - std::time::Duration::from_secs(3600);
        let times = std::fs::File::options().write(true).open(&old).unwrap();
        times.set_modified(past).unwrap();
        drop(times);
        let _ = new;

        let searcher = ContentSearcher::new(config("hit")).unwrap();
        let results = searcher.search(dir.path()).await;
        assert_eq!(results.len(), 3);
        // Newest file first, then the older file's matches in line order
        assert!(results[0].path.ends_with("new.txt"));
        assert!(results[1].path.ends_with("old.txt"));
        assert_eq!(results[1].line_number, 1);
        assert_eq!(results[2].line_number, 2);
    }

    #[tokio::test]
    async fn skips_excluded_directories() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.rs", "find me");
        write(dir.path(), "target/debug/out.rs", "find me");
        write(dir.path(), ".git/config", "find me");

        let searcher = ContentSearcher::new(config("find me")).unwrap();
        let results = searcher.search(dir.path()).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].path.ends_with("src/main.rs"));
    }

    #[tokio::test]
    async fn include_and_exclude_patterns() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "code.rs", "pattern here");
        write(dir.path(), "notes.md", "pattern here");
        write(dir.path(), "data.json", "pattern here");

        let mut cfg = config("pattern");
        cfg.include_patterns = vec!["*.rs".into(), "*.md".into()];
        cfg.exclude_patterns = vec!["*.md".into()];
        let searcher = ContentSearcher::new(cfg).unwrap();
        let results = searcher.search(dir.path()).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].path.ends_with("code.rs"));
    }

    #[tokio::test]
    async fn case_insensitive_search() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "Needle\nNEEDLE\nneedle");

        let mut cfg = config("needle");
        cfg.case_sensitive = false;
        let searcher = ContentSearcher::new(cfg).unwrap();
        assert_eq!(searcher.search(dir.path()).await.len(), 3);

        let searcher = ContentSearcher::new(config("needle")).unwrap();
        assert_eq!(searcher.search(dir.path()).await.len(), 1);
    }

    #[tokio::test]
    async fn context_lines_captured() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "one\ntwo\nthree\nfour\nfive");

        let mut cfg = config("three");
        cfg.context_lines = 1;
        let searcher = ContentSearcher::new(cfg).unwrap();
        let results = searcher.search(dir.path()).await;
        assert_eq!(results[0].context_before, vec!["two"]);
        assert_eq!(results[0].context_after, vec!["four"]);
    }

    #[test]
    fn invalid_regex_is_constructor_error() {
        assert!(ContentSearcher::new(config("[unclosed")).is_err());
    }

    #[test]
    fn format_results_empty() {
        assert_eq!(format_results(&[]), "No matches found");
    }

    #[test]
    fn format_results_with_context() {
        let results = vec![MatchResult {
            path: PathBuf::from("/src/lib.rs"),
            total_lines: 10,
            line_number: 5,
            line: "let needle = 1;".into(),
            context_before: vec!["// setup".into()],
            context_after: vec!["use_it(needle);".into()],
            modified: SystemTime::UNIX_EPOCH,
        }];
        let text = format_results(&results);
        assert!(text.contains("/src/lib.rs total_lines: 10"));
        assert!(text.contains("4-// setup"));
        assert!(text.contains("5:let needle = 1;"));
        assert!(text.contains("6-use_it(needle);"));
        assert!(text.contains("Found 1 matches in 1 files"));
    }
}
