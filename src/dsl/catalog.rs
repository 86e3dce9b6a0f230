//! Catalog of known task names and tool identifiers
//!
//! Injected by the orchestrator into the parser and validator.
//! A side left as `None` is unrestricted: every name is accepted.

use rustc_hash::FxHashSet;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    tasks: Option<FxHashSet<String>>,
    tools: Option<FxHashSet<String>>,
}

impl Catalog {
    /// Catalog that accepts any task and tool
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn with_tasks<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tasks = Some(tasks.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    pub fn has_task(&self, name: &str) -> bool {
        self.tasks.as_ref().map_or(true, |t| t.contains(name))
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.as_ref().map_or(true, |t| t.contains(name))
    }

    pub fn restricts_tasks(&self) -> bool {
        self.tasks.is_some()
    }

    pub fn restricts_tools(&self) -> bool {
        self.tools.is_some()
    }

    /// Known task names, sorted (empty when unrestricted)
    pub fn task_names(&self) -> Vec<&str> {
        sorted(self.tasks.as_ref())
    }

    /// Known tool identifiers, sorted (empty when unrestricted)
    pub fn tool_names(&self) -> Vec<&str> {
        sorted(self.tools.as_ref())
    }

    /// Closest known task name, for "did you mean" suggestions
    pub fn suggest_task(&self, name: &str) -> Option<&str> {
        closest(name, self.tasks.as_ref())
    }

    pub fn suggest_tool(&self, name: &str) -> Option<&str> {
        closest(name, self.tools.as_ref())
    }
}

fn sorted(set: Option<&FxHashSet<String>>) -> Vec<&str> {
    let mut names: Vec<&str> = set
        .map(|s| s.iter().map(String::as_str).collect())
        .unwrap_or_default();
    names.sort_unstable();
    names
}

/// Pick the known name with the smallest edit distance (at most 3 edits)
fn closest<'a>(name: &str, set: Option<&'a FxHashSet<String>>) -> Option<&'a str> {
    set?.iter()
        .map(|candidate| (levenshtein(name, candidate), candidate.as_str()))
        .filter(|(d, _)| *d <= 3)
        .min()
        .map(|(_, c)| c)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut cur = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        prev = cur;
    }
    prev[b.len()]
}
