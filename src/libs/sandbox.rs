use crate::libs::core::models::PostKind;
use crate::libs::feed::PostDraft;

pub const DEFAULT_FILE_NAME: &str = "app.js";

pub const DEFAULT_SNIPPET: &str = r#"// Welcome to Vibogram Code Playground
// Write some JS or Python logic here...

const greet = (name) => {
  return "Hello, " + name + "! 🚀";
};

console.log(greet("Developer"));"#;

/// Language tag for a file name, by extension.
pub fn language_for(file_name: &str) -> Option<&'static str> {
    let (_, extension) = file_name.rsplit_once('.')?;
    let language = match extension.to_ascii_lowercase().as_str() {
        "js" | "mjs" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "py" => "python",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        "kt" => "kotlin",
        "swift" => "swift",
        "css" => "css",
        "html" => "html",
        "json" => "json",
        "sql" => "sql",
        _ => return None,
    };
    Some(language)
}

/// The code playground buffer. Tracks unsaved edits against the last save.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeSandbox {
    file_name: String,
    code: String,
    saved: String,
}

impl Default for CodeSandbox {
    fn default() -> Self {
        Self::with_file(DEFAULT_FILE_NAME, DEFAULT_SNIPPET)
    }
}

impl CodeSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(file_name: impl Into<String>, code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            file_name: file_name.into(),
            saved: code.clone(),
            code,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn language(&self) -> Option<&'static str> {
        language_for(&self.file_name)
    }

    pub fn line_count(&self) -> usize {
        self.code.lines().count().max(1)
    }

    pub fn edit(&mut self, code: impl Into<String>) {
        self.code = code.into();
    }

    pub fn save(&mut self) {
        self.saved = self.code.clone();
    }

    /// Drops unsaved edits.
    pub fn revert(&mut self) {
        self.code = self.saved.clone();
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_dirty(&self) -> bool {
        self.code != self.saved
    }

    /// A code post carrying the current buffer.
    pub fn share_draft(&self, title: Option<String>) -> PostDraft {
        PostDraft {
            content: self.code.clone(),
            kind: PostKind::Code,
            media_url: None,
            title: title.or_else(|| Some(self.file_name.clone())),
            language: self.language().map(str::to_string),
        }
    }
}
