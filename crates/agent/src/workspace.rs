//! Workspace overview for the environment prompt.
//!
//! A bounded breadth-first listing of the working directory: files before
//! subdirectories at each level, two-space indentation per depth, dotfiles
//! and build/VCS directories skipped.

use std::path::Path;

/// Directory names never listed.
pub const DEFAULT_IGNORE_DIRS: &[&str] = &[
    "node_modules",
    "vendor",
    "target",
    "build",
    "dist",
    "log",
    "tmp",
    ".git",
];

/// Render a bounded overview of the tree rooted at `root`, listing at most
/// `max_items` entries. An empty `ignore` list falls back to
/// [`DEFAULT_IGNORE_DIRS`].
pub fn directory_overview(root: &Path, max_items: usize, ignore: &[String]) -> std::io::Result<String> {
    let max_items = if max_items == 0 { 200 } else { max_items };
    let mut output = String::new();
    let mut count = 0usize;

    let is_ignored = |name: &str| -> bool {
        if ignore.is_empty() {
            DEFAULT_IGNORE_DIRS.contains(&name)
        } else {
            ignore.iter().any(|d| d == name)
        }
    };

    fn visit(
        dir: &Path,
        depth: usize,
        max_items: usize,
        count: &mut usize,
        output: &mut String,
        is_ignored: &dyn Fn(&str) -> bool,
    ) -> std::io::Result<()> {
        if *count >= max_items {
            return Ok(());
        }

        let mut files = Vec::new();
        let mut dirs = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || is_ignored(&name) {
                continue;
            }
            if entry.file_type()?.is_dir() {
                dirs.push(name);
            } else {
                files.push(name);
            }
        }
        files.sort();
        dirs.sort();

        let indent = "  ".repeat(depth);

        for name in files {
            if *count >= max_items {
                return Ok(());
            }
            output.push_str(&format!("{indent}- {name}\n"));
            *count += 1;
        }

        for name in dirs {
            if *count >= max_items {
                return Ok(());
            }
            output.push_str(&format!("{indent}{name}/\n"));
            *count += 1;
            visit(&dir.join(&name), depth + 1, max_items, count, output, is_ignored)?;
        }

        Ok(())
    }

    visit(root, 0, max_items, &mut count, &mut output, &is_ignored)?;
    Ok(output)
}
