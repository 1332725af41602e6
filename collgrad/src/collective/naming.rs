use std::collections::HashMap;
use std::sync::Mutex;

/// Deterministic default names for calls that omit one.
///
/// Ranks that issue the same sequence of unnamed calls get the same
/// sequence of names, which is what the engine matches on. Each collective
/// kind counts independently.
#[derive(Debug, Default)]
pub struct NameGenerator {
    scope: String,
    counters: Mutex<HashMap<&'static str, u64>>,
}

impl NameGenerator {
    pub fn new(scope: Option<&str>) -> Self {
        Self {
            scope: scope.unwrap_or_default().to_string(),
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// `name` if given, else the next `"{scope}{kind}.noname.{n}"`.
    pub fn resolve(&self, kind: &'static str, name: Option<&str>) -> String {
        match name {
            Some(n) => n.to_string(),
            None => format!("{}{kind}.noname.{}", self.scope, self.next(kind)),
        }
    }

    fn next(&self, kind: &'static str) -> u64 {
        // A poisoned map only ever held counters, which stay valid.
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let n = counters.entry(kind).or_insert(0);
        *n += 1;
        *n
    }

    /// Restart every counter.
    pub fn reset(&self) {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counters.clear();
    }
}
