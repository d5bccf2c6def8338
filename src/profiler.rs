// profiler.rs — hierarchical wall-clock profiler for the benchmark harness.
//
// Named scopes nest: tic("GPU"), tic("setup"), toc("setup"), ... builds a
// tree whose Display impl prints an indented summary with per-scope time
// and the share of the run total. Scopes are strict LIFO and
// non-reentrant: toc() must name the innermost open scope, and a scope
// cannot be started while it is already running. Violations are caller
// bugs and panic with the scope names involved.
//
// Device work is measured elsewhere (GPU timestamps, see gpu::surface);
// record() folds such externally measured intervals into the tree so the
// report can show device-execution time instead of host dispatch time.
//
// Nodes live in a flat arena (Vec) with parent indices rather than owned
// children, which keeps tic/toc free of borrow gymnastics.

use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Scope {
    name: String,
    parent: Option<usize>,
    children: Vec<usize>,
    total: Duration,
    /// Set while the scope is running.
    started: Option<Instant>,
    /// Number of completed tic/toc pairs (or record calls).
    hits: u32,
}

/// A tree of named, nestable timing scopes.
#[derive(Debug, Default)]
pub struct Profiler {
    nodes: Vec<Scope>,
    /// Stack of open scope indices; last is the innermost.
    open: Vec<usize>,
}

impl Profiler {
    pub fn new() -> Self {
        Profiler::default()
    }

    /// Open a scope. Re-entering a scope that is already running panics.
    pub fn tic(&mut self, name: &str) {
        assert!(
            !self.open.iter().any(|&i| self.nodes[i].name == name),
            "scope \"{name}\" is already running; scopes are non-reentrant"
        );
        let idx = self.child(name);
        self.nodes[idx].started = Some(Instant::now());
        self.open.push(idx);
    }

    /// Close the innermost open scope, which must be named `name`.
    pub fn toc(&mut self, name: &str) {
        let idx = self
            .open
            .pop()
            .unwrap_or_else(|| panic!("toc(\"{name}\") with no open scope"));
        let node = &mut self.nodes[idx];
        assert_eq!(
            node.name, name,
            "toc(\"{}\") does not match the innermost open scope \"{}\"",
            name, node.name,
        );
        let started = node
            .started
            .take()
            .unwrap_or_else(|| panic!("scope \"{name}\" was never started"));
        node.total += started.elapsed();
        node.hits += 1;
    }

    /// Fold an externally measured interval into a child of the current
    /// scope. Used for device-execution time, where the host clock would
    /// measure dispatch overhead instead of the work.
    pub fn record(&mut self, name: &str, elapsed: Duration) {
        let idx = self.child(name);
        let node = &mut self.nodes[idx];
        node.total += elapsed;
        node.hits += 1;
    }

    /// Total time across all completed top-level scopes.
    pub fn total(&self) -> Duration {
        self.nodes
            .iter()
            .filter(|n| n.parent.is_none())
            .map(|n| n.total)
            .sum()
    }

    /// Completed time of a top-level scope, if it exists.
    pub fn scope_total(&self, name: &str) -> Option<Duration> {
        self.nodes
            .iter()
            .find(|n| n.parent.is_none() && n.name == name)
            .map(|n| n.total)
    }

    // Find or create a child of the current innermost scope.
    fn child(&mut self, name: &str) -> usize {
        let parent = self.open.last().copied();
        let siblings: &[usize] = match parent {
            Some(p) => &self.nodes[p].children,
            None => &[],
        };
        if let Some(&idx) = siblings.iter().find(|&&i| self.nodes[i].name == name) {
            return idx;
        }
        // Top-level scopes are found by scanning for parentless nodes.
        if parent.is_none() {
            if let Some(idx) = self
                .nodes
                .iter()
                .position(|n| n.parent.is_none() && n.name == name)
            {
                return idx;
            }
        }
        let idx = self.nodes.len();
        self.nodes.push(Scope {
            name: name.to_string(),
            parent,
            children: Vec::new(),
            total: Duration::ZERO,
            started: None,
            hits: 0,
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(idx);
        }
        idx
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, idx: usize, depth: usize, parent_total: Duration) -> fmt::Result {
        let node = &self.nodes[idx];
        let secs = node.total.as_secs_f64();
        let share = if parent_total.is_zero() {
            100.0
        } else {
            100.0 * secs / parent_total.as_secs_f64()
        };
        writeln!(
            f,
            "{:indent$}{:<name_w$} {:>10.3} sec ({:5.1}%)",
            "",
            format!("{}:", node.name),
            secs,
            share,
            indent = 2 + depth * 2,
            name_w = 24usize.saturating_sub(depth * 2),
        )?;
        for &c in &node.children {
            self.fmt_node(f, c, depth + 1, node.total)?;
        }
        Ok(())
    }
}

impl fmt::Display for Profiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[ profile ]")?;
        let total = self.total();
        for idx in 0..self.nodes.len() {
            if self.nodes[idx].parent.is_none() {
                self.fmt_node(f, idx, 0, total)?;
            }
        }
        writeln!(
            f,
            "  {:<24} {:>10.3} sec",
            "total:",
            total.as_secs_f64(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn nested_scopes_accumulate() {
        let mut prof = Profiler::new();
        prof.tic("outer");
        prof.tic("inner");
        sleep(Duration::from_millis(5));
        prof.toc("inner");
        prof.toc("outer");

        let outer = prof.scope_total("outer").unwrap();
        assert!(outer >= Duration::from_millis(5));
        // Inner is not a top-level scope.
        assert!(prof.scope_total("inner").is_none());
    }

    #[test]
    fn repeated_scopes_sum() {
        let mut prof = Profiler::new();
        for _ in 0..3 {
            prof.tic("phase");
            sleep(Duration::from_millis(2));
            prof.toc("phase");
        }
        let t = prof.scope_total("phase").unwrap();
        assert!(t >= Duration::from_millis(6), "3×2ms should accumulate, got {t:?}");
    }

    #[test]
    fn record_adds_external_time() {
        let mut prof = Profiler::new();
        prof.tic("GPU");
        prof.record("interpolate", Duration::from_millis(250));
        prof.toc("GPU");
        // The recorded child shows up in the report.
        let report = prof.to_string();
        assert!(report.contains("interpolate"), "report missing scope:\n{report}");
        assert!(report.contains("GPU"), "report missing scope:\n{report}");
    }

    #[test]
    fn display_is_nonempty_and_ordered() {
        let mut prof = Profiler::new();
        prof.tic("generate data");
        prof.toc("generate data");
        prof.tic("CPU");
        prof.tic("setup");
        prof.toc("setup");
        prof.toc("CPU");
        let report = prof.to_string();
        let gen_pos = report.find("generate data").unwrap();
        let cpu_pos = report.find("CPU").unwrap();
        assert!(gen_pos < cpu_pos, "scopes should print in creation order:\n{report}");
        assert!(report.contains("total:"));
    }

    #[test]
    #[should_panic(expected = "does not match")]
    fn mismatched_toc_panics() {
        let mut prof = Profiler::new();
        prof.tic("a");
        prof.tic("b");
        prof.toc("a");
    }

    #[test]
    #[should_panic(expected = "non-reentrant")]
    fn reentrant_tic_panics() {
        let mut prof = Profiler::new();
        prof.tic("a");
        prof.tic("a");
    }

    #[test]
    #[should_panic(expected = "no open scope")]
    fn toc_without_tic_panics() {
        let mut prof = Profiler::new();
        prof.toc("ghost");
    }
}
