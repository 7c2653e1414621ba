//! Line diffs for reports.

/// Middle sections larger than this (old lines x new lines) are rendered as a
/// full replacement instead of running the quadratic LCS.
const LCS_CELL_LIMIT: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLine<'a> {
    Context(&'a str),
    Removed(&'a str),
    Added(&'a str),
}

impl DiffLine<'_> {
    fn is_change(&self) -> bool {
        !matches!(self, Self::Context(_))
    }

    fn touches_old(&self) -> bool {
        !matches!(self, Self::Added(_))
    }

    fn touches_new(&self) -> bool {
        !matches!(self, Self::Removed(_))
    }
}

/// Line-level edit script turning `before` into `after`.
pub fn line_diff<'a>(before: &'a str, after: &'a str) -> Vec<DiffLine<'a>> {
    let old: Vec<&str> = before.lines().collect();
    let new: Vec<&str> = after.lines().collect();

    let prefix = old
        .iter()
        .zip(&new)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut out: Vec<DiffLine<'a>> = old[..prefix].iter().map(|l| DiffLine::Context(l)).collect();
    out.extend(diff_middle(old_mid, new_mid));
    out.extend(old[old.len() - suffix..].iter().map(|l| DiffLine::Context(l)));
    out
}

fn diff_middle<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<DiffLine<'a>> {
    if old.is_empty() || new.is_empty() || old.len() * new.len() > LCS_CELL_LIMIT {
        let mut out: Vec<DiffLine<'a>> = old.iter().map(|l| DiffLine::Removed(l)).collect();
        out.extend(new.iter().map(|l| DiffLine::Added(l)));
        return out;
    }

    // lcs[i][j] = LCS length of old[i..] and new[j..]
    let width = new.len() + 1;
    let mut lcs = vec![0u32; (old.len() + 1) * width];
    for i in (0..old.len()).rev() {
        for j in (0..new.len()).rev() {
            lcs[i * width + j] = if old[i] == new[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let mut out = Vec::with_capacity(old.len() + new.len());
    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        if old[i] == new[j] {
            out.push(DiffLine::Context(old[i]));
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
            out.push(DiffLine::Removed(old[i]));
            i += 1;
        } else {
            out.push(DiffLine::Added(new[j]));
            j += 1;
        }
    }
    out.extend(old[i..].iter().map(|l| DiffLine::Removed(l)));
    out.extend(new[j..].iter().map(|l| DiffLine::Added(l)));
    out
}

/// Unified diff with `context` lines around each hunk. Empty when the texts
/// have the same lines.
pub fn unified_diff(path: &str, before: &str, after: &str, context: usize) -> String {
    let ops = line_diff(before, after);
    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| op.is_change())
        .map(|(idx, _)| idx)
        .collect();
    let Some(&first) = changes.first() else {
        return String::new();
    };

    let mut hunks: Vec<(usize, usize)> = Vec::new();
    let mut start = first.saturating_sub(context);
    let mut end = (first + context + 1).min(ops.len());
    for &idx in &changes[1..] {
        if idx.saturating_sub(context) <= end {
            end = (idx + context + 1).min(ops.len());
        } else {
            hunks.push((start, end));
            start = idx.saturating_sub(context);
            end = (idx + context + 1).min(ops.len());
        }
    }
    hunks.push((start, end));

    // 0-indexed line positions before each op.
    let mut positions = Vec::with_capacity(ops.len());
    let (mut old_line, mut new_line) = (0usize, 0usize);
    for op in &ops {
        positions.push((old_line, new_line));
        if op.touches_old() {
            old_line += 1;
        }
        if op.touches_new() {
            new_line += 1;
        }
    }

    let mut out = format!("--- a/{path}\n+++ b/{path}\n");
    for (start, end) in hunks {
        let slice = &ops[start..end];
        let old_count = slice.iter().filter(|op| op.touches_old()).count();
        let new_count = slice.iter().filter(|op| op.touches_new()).count();
        let (old_start, new_start) = positions[start];
        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            hunk_start(old_start, old_count),
            old_count,
            hunk_start(new_start, new_count),
            new_count
        ));
        for op in slice {
            let (sign, line) = match op {
                DiffLine::Context(l) => (' ', l),
                DiffLine::Removed(l) => ('-', l),
                DiffLine::Added(l) => ('+', l),
            };
            out.push(sign);
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn hunk_start(zero_based: usize, count: usize) -> usize {
    if count == 0 { zero_based } else { zero_based + 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_texts_have_no_diff() {
        assert_eq!(unified_diff("a.txt", "x\ny\n", "x\ny", 3), "");
    }

    #[test]
    fn single_line_change() {
        let diff = unified_diff("a.txt", "one\ntwo\nthree", "one\n2\nthree", 3);
        assert_eq!(
            diff,
            "--- a/a.txt\n+++ b/a.txt\n@@ -1,3 +1,3 @@\n one\n-two\n+2\n three\n"
        );
    }

    #[test]
    fn distant_changes_split_into_hunks() {
        let before: String = (1..=20).map(|n| format!("{n}\n")).collect();
        let after: String = (1..=20)
            .map(|n| match n {
                2 => "two\n".to_string(),
                19 => "nineteen\n".to_string(),
                _ => format!("{n}\n"),
            })
            .collect();
        let diff = unified_diff("n.txt", &before, &after, 1);
        assert_eq!(diff.matches("@@ -").count(), 2);
        assert!(diff.contains("@@ -1,3 +1,3 @@\n 1\n-2\n+two\n 3\n"));
        assert!(diff.contains("@@ -18,3 +18,3 @@\n 18\n-19\n+nineteen\n 20\n"));
    }

    #[test]
    fn pure_insertion_into_empty_file() {
        let diff = unified_diff("new.txt", "", "a\nb", 3);
        assert_eq!(diff, "--- a/new.txt\n+++ b/new.txt\n@@ -0,0 +1,2 @@\n+a\n+b\n");
    }

    #[test]
    fn line_diff_keeps_common_lines() {
        let ops = line_diff("a\nb\nc", "a\nc\nd");
        assert_eq!(
            ops,
            vec![
                DiffLine::Context("a"),
                DiffLine::Removed("b"),
                DiffLine::Context("c"),
                DiffLine::Added("d"),
            ]
        );
    }
}
