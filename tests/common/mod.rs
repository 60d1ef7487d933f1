/*!
 * Common test utilities for the bookling test suite
 */

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;

use bookling::app_config::Config;
use bookling::database::Repository;
use bookling::pipeline::Orchestrator;
use bookling::providers::mock::MockClient;
use bookling::translation::retry::RecordingSleeper;

/// Orchestrator over an in-memory database with a mock backend
pub struct TestPipeline {
    pub orchestrator: Arc<Orchestrator>,
    pub client: Arc<MockClient>,
    pub sleeper: RecordingSleeper,
    pub repo: Repository,
    pub config: Config,
    pub dir: TempDir,
}

impl TestPipeline {
    /// Pipeline with the default configuration
    pub fn new(client: MockClient) -> Self {
        Self::with_config(client, |_| {})
    }

    /// Pipeline with configuration tweaks applied on top of the defaults
    pub fn with_config<F: FnOnce(&mut Config)>(client: MockClient, tweak: F) -> Self {
        init_logging();
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.artifact_dir = dir.path().join("artifacts");
        tweak(&mut config);

        let repo = Repository::new_in_memory().unwrap();
        let client = Arc::new(client);
        let sleeper = RecordingSleeper::new();
        let orchestrator = Orchestrator::from_config_with_sleeper(
            &config,
            repo.clone(),
            client.clone(),
            Arc::new(sleeper.clone()),
        )
        .unwrap();

        Self {
            orchestrator: Arc::new(orchestrator),
            client,
            sleeper,
            repo,
            config,
            dir,
        }
    }

    /// A second orchestrator over the same database, as after a restart
    pub fn restarted(&self, client: MockClient) -> (Arc<Orchestrator>, Arc<MockClient>) {
        let client = Arc::new(client);
        let orchestrator = Orchestrator::from_config_with_sleeper(
            &self.config,
            self.repo.clone(),
            client.clone(),
            Arc::new(RecordingSleeper::new()),
        )
        .unwrap();
        (Arc::new(orchestrator), client)
    }

    /// Write a document into the pipeline's temp directory
    pub fn write_document(&self, name: &str, content: &str) -> PathBuf {
        create_test_file(self.dir.path(), name, content).unwrap()
    }
}

/// Route log output through env_logger once per test binary
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    fs::write(&file_path, content)?;
    Ok(file_path)
}

/// Paragraph `p` of chapter `c` in `sample_book`
pub fn sample_paragraph(c: usize, p: usize) -> String {
    format!(
        "In chapter {} traveller number {} watches the distant mountain and writes a letter.",
        c + 1,
        p + 1
    )
}

/// A book with `chapters` headed chapters of `paragraphs` paragraphs each
pub fn sample_book(chapters: usize, paragraphs: usize) -> String {
    let mut book = String::new();
    for c in 0..chapters {
        book.push_str(&format!("# Chapter {}\n\n", c + 1));
        for p in 0..paragraphs {
            book.push_str(&sample_paragraph(c, p));
            book.push_str("\n\n");
        }
    }
    book
}

/// Whether any recorded client call carried `text`
pub fn was_sent(client: &MockClient, text: &str) -> bool {
    client.requests().iter().flatten().any(|t| t == text)
}
