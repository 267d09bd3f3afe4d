//! Script source and module search directories handed to a run.

use std::sync::Arc;

/// Script source plus ordered module search directories.
///
/// Cloning is cheap: the source buffer is shared and never mutated, so the
/// worker can hold a snapshot while the controller replaces the script.
#[derive(Debug, Clone, Default)]
pub struct ScriptPayload {
    source: Arc<[u8]>,
    search_dirs: Vec<String>,
}

impl ScriptPayload {
    pub fn new(source: impl AsRef<[u8]>, search_dirs: Vec<String>) -> Self {
        Self {
            source: Arc::from(source.as_ref()),
            search_dirs,
        }
    }

    pub fn source(&self) -> &[u8] {
        &self.source
    }

    pub fn search_dirs(&self) -> &[String] {
        &self.search_dirs
    }

    pub(crate) fn set_source(&mut self, source: impl AsRef<[u8]>) {
        self.source = Arc::from(source.as_ref());
    }

    pub(crate) fn set_search_dirs(&mut self, dirs: Vec<String>) {
        self.search_dirs = dirs;
    }

    /// Render the search directories as a `package.path` prefix.
    ///
    /// Each directory becomes `<dir>/?.lua;`, in order, so prepending the
    /// result to the existing path makes earlier directories win.
    pub fn package_path_prefix(&self) -> String {
        render_path_prefix(&self.search_dirs, std::path::MAIN_SEPARATOR)
    }
}

fn render_path_prefix(dirs: &[String], separator: char) -> String {
    let prefix: String = dirs
        .iter()
        .map(|dir| format!("{}/?.lua;", dir.trim_end_matches(['/', separator])))
        .collect();

    if separator == '/' {
        prefix
    } else {
        prefix.replace('/', &separator.to_string())
    }
}
