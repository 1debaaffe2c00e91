/// Class-index to label lookup, injected at backend construction.
///
/// Indices past the end resolve to a generated `class_<index>` placeholder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
    names: Vec<String>,
}

impl LabelMap {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// One label per line; blank lines and `#` comments are skipped.
    pub fn from_lines(text: &str) -> Self {
        let names = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(String::from)
            .collect();
        Self { names }
    }

    pub fn label(&self, index: usize) -> String {
        match self.names.get(index) {
            Some(name) => name.clone(),
            None => format!("class_{}", index),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
