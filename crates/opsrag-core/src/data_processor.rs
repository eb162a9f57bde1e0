use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::chunker::TextSplitter;
use crate::error::{Error, Result};
use crate::types::Chunk;

/// Reads the corpus (a text file or a directory of `*.txt` files) and chunks it.
#[derive(Debug, Clone)]
pub struct DataProcessor {
    splitter: TextSplitter,
}

impl DataProcessor {
    pub fn new(splitter: TextSplitter) -> Self { Self { splitter } }

    pub fn splitter(&self) -> &TextSplitter { &self.splitter }

    pub fn process(&self, source: &Path) -> Result<Vec<Chunk>> {
        let text = self.load_corpus(source)?;
        let chunks = self.splitter.split(&text);
        info!(path = %source.display(), chars = text.chars().count(), chunks = chunks.len(), "chunked corpus");
        Ok(chunks)
    }

    /// Full corpus text. Directory sources are concatenated in path order with a blank line between files.
    pub fn load_corpus(&self, source: &Path) -> Result<String> {
        if source.is_dir() {
            let files = self.list_txt_files(source);
            if files.is_empty() {
                return Err(Error::InvalidConfig(format!("no .txt files found under {}", source.display())));
            }
            let mut parts = Vec::with_capacity(files.len());
            for (file_index, file_path) in files.iter().enumerate() {
                debug!(file = %file_path.display(), "reading corpus file {}/{}", file_index + 1, files.len());
                parts.push(self.read_file_content(file_path)?);
            }
            Ok(parts.join("\n\n"))
        } else {
            self.read_file_content(source)
        }
    }

    fn read_file_content(&self, file_path: &Path) -> Result<String> {
        fs::read_to_string(file_path).map_err(|e| {
            Error::Io(std::io::Error::new(e.kind(), format!("{}: {}", file_path.display(), e)))
        })
    }

    fn list_txt_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut txt_files = Vec::new();
        for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()).filter(|e| e.file_type().is_file()) {
            let path = entry.path(); if path.extension().and_then(|s| s.to_str()) == Some("txt") { txt_files.push(path.to_path_buf()); }
        }
        txt_files.sort(); txt_files
    }
}
