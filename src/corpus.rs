//! Corpus directory scanning.
//!
//! Walks `corpus.dir` recursively, filters paths with the configured
//! include/exclude globs (matched against the path relative to the root),
//! and reads each file as UTF-8 text. Results are sorted by relative path
//! so chunk ids and index contents are deterministic.
//!
//! When `seed_samples` is set and the directory does not exist, it is
//! created and populated with a few starter tutor documents.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

use tutor_rag_core::models::Document;

use crate::config::CorpusConfig;

const SAMPLE_DOCUMENTS: [(&str, &str); 3] = [
    (
        "python_basics.txt",
        "Python Programming Basics

Python is a high-level, interpreted programming language known for its simplicity and readability.
It was created by Guido van Rossum and first released in 1991.

Key Features:
- Easy to learn and use
- Interpreted language
- Dynamically typed
- Object-oriented
- Extensive standard library

Python is widely used in:
- Web development (Django, Flask)
- Data science and analysis
- Machine learning and AI
- Automation and scripting
- Scientific computing",
    ),
    (
        "machine_learning.txt",
        "Machine Learning Fundamentals

Machine Learning is a subset of artificial intelligence that enables systems to learn from data.

Types of Machine Learning:
1. Supervised Learning: Uses labeled training data
2. Unsupervised Learning: Uses unlabeled data
3. Reinforcement Learning: Learns through interaction

Common ML Algorithms:
- Linear Regression
- Decision Trees
- Random Forests
- Neural Networks",
    ),
    (
        "data_structures.txt",
        "Data Structures and Algorithms

Data structures are ways of organizing and storing data efficiently.

Common Data Structures:
1. Arrays: Fixed-size collection
2. Linked Lists: Dynamic size
3. Stacks: LIFO (Last In First Out)
4. Queues: FIFO (First In First Out)
5. Trees: Hierarchical structure
6. Graphs: Nodes and edges",
    ),
];

/// Load every matching, non-blank document under `config.dir`.
///
/// A missing directory yields an empty list unless `seed_samples` is set.
pub fn load_documents(config: &CorpusConfig) -> Result<Vec<Document>> {
    let root = &config.dir;
    if !root.exists() {
        if !config.seed_samples {
            warn!(dir = %root.display(), "corpus directory does not exist");
            return Ok(Vec::new());
        }
        seed_sample_documents(root)?;
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
    default_excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&default_excludes)?;

    let mut documents = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        if text.trim().is_empty() {
            warn!(path = %path.display(), "skipping empty document");
            continue;
        }

        documents.push(Document::new(rel_str, text));
    }

    documents.sort_by(|a, b| a.id.cmp(&b.id));
    info!(dir = %root.display(), documents = documents.len(), "loaded corpus");
    Ok(documents)
}

/// Create `dir` and write the starter documents into it.
pub fn seed_sample_documents(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create corpus directory: {}", dir.display()))?;
    for (name, content) in SAMPLE_DOCUMENTS {
        let path = dir.join(name);
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write sample document: {}", path.display()))?;
    }
    info!(dir = %dir.display(), count = SAMPLE_DOCUMENTS.len(), "created sample documents");
    Ok(())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern).with_context(|| format!("Invalid glob pattern: {}", pattern))?,
        );
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn corpus(dir: &Path, seed: bool) -> CorpusConfig {
        CorpusConfig {
            dir: dir.to_path_buf(),
            include_globs: vec!["**/*.txt".into()],
            exclude_globs: vec![],
            seed_samples: seed,
        }
    }

    #[test]
    fn test_loads_sorted_txt_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("b.txt"), "Bravo").unwrap();
        std::fs::write(tmp.path().join("nested/a.txt"), "Alpha").unwrap();
        std::fs::write(tmp.path().join("notes.md"), "ignored").unwrap();

        let docs = load_documents(&corpus(tmp.path(), false)).unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b.txt", "nested/a.txt"]);
        assert_eq!(docs[1].text, "Alpha");
    }

    #[test]
    fn test_blank_files_are_skipped() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("blank.txt"), "  \n\t ").unwrap();
        std::fs::write(tmp.path().join("real.txt"), "content").unwrap();
        let docs = load_documents(&corpus(tmp.path(), false)).unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn test_exclude_globs() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("drafts")).unwrap();
        std::fs::write(tmp.path().join("drafts/x.txt"), "draft").unwrap();
        std::fs::write(tmp.path().join("final.txt"), "final").unwrap();
        let mut config = corpus(tmp.path(), false);
        config.exclude_globs = vec!["drafts/**".into()];
        let docs = load_documents(&config).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "final.txt");
    }

    #[test]
    fn test_missing_dir_is_seeded() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("data");
        let docs = load_documents(&corpus(&dir, true)).unwrap();
        assert_eq!(docs.len(), 3);
        assert!(docs.iter().any(|d| d.text.contains("Guido van Rossum")));
    }

    #[test]
    fn test_missing_dir_without_seeding_is_empty() {
        let tmp = TempDir::new().unwrap();
        let docs = load_documents(&corpus(&tmp.path().join("none"), false)).unwrap();
        assert!(docs.is_empty());
    }
}
