//! Line diffs in unified format.
//!
//! Lines keep their terminators, so `\r\n` endings and a missing final
//! newline survive a diff and apply cycle unchanged.

/// Lines of context around each change.
pub const CONTEXT_LINES: usize = 3;

pub const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// One step of an edit script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

/// Furthest-reaching x per diagonal, indexed by a signed diagonal number.
struct Frontier {
    offset: isize,
    x: Vec<usize>,
}

impl Frontier {
    fn new(max_d: usize) -> Self {
        Self {
            offset: max_d as isize,
            x: vec![0; 2 * max_d + 2],
        }
    }

    fn get(&self, k: isize) -> usize {
        self.x[(k + self.offset) as usize]
    }

    fn set(&mut self, k: isize, x: usize) {
        let idx = (k + self.offset) as usize;
        self.x[idx] = x;
    }
}

fn max_d(n: usize, m: usize) -> usize {
    (n + m).div_ceil(2) + 1
}

fn common_prefix(a: &[&str], b: &[&str]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[&str], b: &[&str]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// A point on a shortest edit path that splits it into two halves, found by
/// running the search from both ends until the frontiers overlap.
fn middle_snake(
    a: &[&str],
    b: &[&str],
    vf: &mut Frontier,
    vb: &mut Frontier,
) -> Option<(usize, usize)> {
    let n = a.len();
    let m = b.len();
    let delta = n as isize - m as isize;
    let odd = delta & 1 == 1;
    vf.set(1, 0);
    vb.set(1, 0);

    for d in 0..max_d(n, m) as isize {
        for k in (-d..=d).rev().step_by(2) {
            let mut x = if k == -d || (k != d && vf.get(k - 1) < vf.get(k + 1)) {
                vf.get(k + 1)
            } else {
                vf.get(k - 1) + 1
            };
            let y = (x as isize - k) as usize;
            let (x0, y0) = (x, y);
            if x < n && y < m {
                x += common_prefix(&a[x..], &b[y..]);
            }
            vf.set(k, x);
            if odd && (k - delta).abs() < d && vf.get(k) + vb.get(delta - k) >= n {
                return Some((x0, y0));
            }
        }

        for k in (-d..=d).rev().step_by(2) {
            let mut x = if k == -d || (k != d && vb.get(k - 1) < vb.get(k + 1)) {
                vb.get(k + 1)
            } else {
                vb.get(k - 1) + 1
            };
            let mut y = (x as isize - k) as usize;
            if x < n && y < m {
                let advance = common_suffix(&a[..n - x], &b[..m - y]);
                x += advance;
                y += advance;
            }
            vb.set(k, x);
            if !odd && (k - delta).abs() <= d && vb.get(k) + vf.get(delta - k) >= n {
                return Some((n - x, m - y));
            }
        }
    }
    None
}

/// Append the edit script for `a -> b` to `ops`.
fn conquer(a: &[&str], b: &[&str], vf: &mut Frontier, vb: &mut Frontier, ops: &mut Vec<Op>) {
    let prefix = common_prefix(a, b);
    let (a, b) = (&a[prefix..], &b[prefix..]);
    let suffix = common_suffix(a, b);
    let (a, b) = (&a[..a.len() - suffix], &b[..b.len() - suffix]);
    ops.extend(std::iter::repeat_n(Op::Equal, prefix));

    if a.is_empty() || b.is_empty() {
        ops.extend(std::iter::repeat_n(Op::Delete, a.len()));
        ops.extend(std::iter::repeat_n(Op::Insert, b.len()));
    } else if let Some((x, y)) = middle_snake(a, b, vf, vb) {
        conquer(&a[..x], &b[..y], vf, vb, ops);
        conquer(&a[x..], &b[y..], vf, vb, ops);
    } else {
        ops.extend(std::iter::repeat_n(Op::Delete, a.len()));
        ops.extend(std::iter::repeat_n(Op::Insert, b.len()));
    }

    ops.extend(std::iter::repeat_n(Op::Equal, suffix));
}

/// Shortest edit script between two line sequences.
///
/// Linear-space Myers: memory stays proportional to the input size no matter
/// how far apart the two sides are. Within each changed run, deletions are
/// listed before insertions.
fn edit_script(a: &[&str], b: &[&str]) -> Vec<Op> {
    let bound = max_d(a.len(), b.len());
    let mut vf = Frontier::new(bound);
    let mut vb = Frontier::new(bound);
    let mut ops = Vec::with_capacity(a.len() + b.len());
    conquer(a, b, &mut vf, &mut vb, &mut ops);

    let mut start = 0;
    while start < ops.len() {
        if ops[start] == Op::Equal {
            start += 1;
            continue;
        }
        let end = ops[start..]
            .iter()
            .position(|op| *op == Op::Equal)
            .map_or(ops.len(), |len| start + len);
        ops[start..end].sort_by_key(|op| *op == Op::Insert);
        start = end;
    }
    ops
}

/// Tag of a hunk line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTag {
    Context,
    Remove,
    Add,
}

impl LineTag {
    pub fn as_char(&self) -> char {
        match self {
            Self::Context => ' ',
            Self::Remove => '-',
            Self::Add => '+',
        }
    }
}

/// A hunk. Starts are 0-based line indexes; `text` keeps terminators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<(LineTag, String)>,
}

fn format_range(start: usize, count: usize) -> String {
    match count {
        0 => format!("{},0", start),
        1 => format!("{}", start + 1),
        _ => format!("{},{}", start + 1, count),
    }
}

impl Hunk {
    pub fn header(&self) -> String {
        format!(
            "@@ -{} +{} @@",
            format_range(self.old_start, self.old_count),
            format_range(self.new_start, self.new_count)
        )
    }

    /// Lines this hunk expects to find in the old text.
    pub fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|(tag, _)| *tag != LineTag::Add)
            .map(|(_, text)| text.as_str())
            .collect()
    }

    /// Lines this hunk produces in the new text.
    pub fn new_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|(tag, _)| *tag != LineTag::Remove)
            .map(|(_, text)| text.as_str())
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = self.header();
        out.push('\n');
        for (tag, text) in &self.lines {
            out.push(tag.as_char());
            out.push_str(text);
            if !text.ends_with('\n') {
                out.push('\n');
                out.push_str(NO_NEWLINE_MARKER);
                out.push('\n');
            }
        }
        out
    }
}

/// Hunks turning `old` into `new`, with `context` lines around changes.
pub fn diff_lines(old: &str, new: &str, context: usize) -> Vec<Hunk> {
    let a: Vec<&str> = old.split_inclusive('\n').collect();
    let b: Vec<&str> = new.split_inclusive('\n').collect();
    let ops = edit_script(&a, &b);

    // Position in both inputs before each op.
    let mut positions = Vec::with_capacity(ops.len() + 1);
    let (mut i, mut j) = (0usize, 0usize);
    for op in &ops {
        positions.push((i, j));
        match op {
            Op::Equal => {
                i += 1;
                j += 1;
            }
            Op::Delete => i += 1,
            Op::Insert => j += 1,
        }
    }
    positions.push((i, j));

    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| **op != Op::Equal)
        .map(|(idx, _)| idx)
        .collect();

    let mut groups: Vec<(usize, usize)> = Vec::new();
    for &idx in &changes {
        match groups.last_mut() {
            Some((_, last)) if idx - *last <= 2 * context + 1 => *last = idx,
            _ => groups.push((idx, idx)),
        }
    }

    groups
        .into_iter()
        .map(|(first, last)| {
            let start = first.saturating_sub(context);
            let end = (last + 1 + context).min(ops.len());
            let (old_start, new_start) = positions[start];
            let mut lines = Vec::with_capacity(end - start);
            let (mut old_count, mut new_count) = (0, 0);
            for (offset, op) in ops[start..end].iter().enumerate() {
                let (oi, nj) = positions[start + offset];
                match op {
                    Op::Equal => {
                        lines.push((LineTag::Context, a[oi].to_string()));
                        old_count += 1;
                        new_count += 1;
                    }
                    Op::Delete => {
                        lines.push((LineTag::Remove, a[oi].to_string()));
                        old_count += 1;
                    }
                    Op::Insert => {
                        lines.push((LineTag::Add, b[nj].to_string()));
                        new_count += 1;
                    }
                }
            }
            Hunk {
                old_start,
                old_count,
                new_start,
                new_count,
                lines,
            }
        })
        .collect()
}

/// What a file diff does to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Add,
    Modify,
    Delete,
}

/// All hunks for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: String,
    pub op: FileOp,
    pub hunks: Vec<Hunk>,
}

impl FileDiff {
    /// Diff two optional versions of a file. `None` when nothing changed.
    pub fn between(path: &str, old: Option<&str>, new: Option<&str>) -> Option<Self> {
        let op = match (old, new) {
            (None, None) => return None,
            (None, Some(_)) => FileOp::Add,
            (Some(_), None) => FileOp::Delete,
            (Some(a), Some(b)) if a == b => return None,
            (Some(_), Some(_)) => FileOp::Modify,
        };
        let hunks = diff_lines(old.unwrap_or(""), new.unwrap_or(""), CONTEXT_LINES);
        Some(Self {
            path: path.to_string(),
            op,
            hunks,
        })
    }

    pub fn render(&self) -> String {
        let (from, to) = match self.op {
            FileOp::Add => ("/dev/null".to_string(), format!("b/{}", self.path)),
            FileOp::Delete => (format!("a/{}", self.path), "/dev/null".to_string()),
            FileOp::Modify => (format!("a/{}", self.path), format!("b/{}", self.path)),
        };
        let mut out = format!("--- {}\n+++ {}\n", from, to);
        for hunk in &self.hunks {
            out.push_str(&hunk.render());
        }
        out
    }
}
