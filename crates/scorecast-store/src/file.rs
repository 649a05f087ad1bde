//! JSON file-backed store.
//!
//! Wraps a [`MemoryStore`] and rewrites the whole document after every
//! change. The document is written to a sibling temp file and renamed into
//! place, so a crash leaves either the old or the new state.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use scorecast_core::error::StoreError;
use scorecast_core::key::AnswerKey;
use scorecast_core::model::{AnswerRecord, Candidate, Exam};
use scorecast_core::traits::{
    ConfirmReceipt, ConfirmedSubject, DerivedState, ExamSnapshot, ExamStore, WriteBatch,
};

use crate::memory::{MemoryStore, StoreDocument};

pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
    /// Held across a change and its save so saves land in change order.
    write: Mutex<()>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let inner = match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let document: StoreDocument = serde_json::from_str(&content)?;
                tracing::debug!(
                    "loaded {} exam(s) from {}",
                    document.exams.len(),
                    path.display()
                );
                MemoryStore::from_document(document)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MemoryStore::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner,
            write: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self) -> Result<(), StoreError> {
        let document = self.inner.to_document().await;
        let json = serde_json::to_string_pretty(&document)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp, json).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ExamStore for JsonFileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn put_exam(&self, exam: Exam) -> Result<(), StoreError> {
        let _guard = self.write.lock().await;
        self.inner.put_exam(exam).await?;
        self.save().await
    }

    async fn exam(&self, exam_id: &str) -> Result<Exam, StoreError> {
        self.inner.exam(exam_id).await
    }

    async fn exam_ids(&self) -> Result<Vec<String>, StoreError> {
        self.inner.exam_ids().await
    }

    async fn register_candidate(&self, candidate: Candidate) -> Result<(), StoreError> {
        let _guard = self.write.lock().await;
        self.inner.register_candidate(candidate).await?;
        self.save().await
    }

    async fn confirm_subject(
        &self,
        confirmed: ConfirmedSubject,
    ) -> Result<ConfirmReceipt, StoreError> {
        let _guard = self.write.lock().await;
        let receipt = self.inner.confirm_subject(confirmed).await?;
        self.save().await?;
        Ok(receipt)
    }

    async fn correct_answer(&self, exam_id: &str, answer: AnswerRecord) -> Result<(), StoreError> {
        let _guard = self.write.lock().await;
        self.inner.correct_answer(exam_id, answer).await?;
        self.save().await
    }

    async fn publish_official_key(&self, exam_id: &str, key: AnswerKey) -> Result<(), StoreError> {
        let _guard = self.write.lock().await;
        self.inner.publish_official_key(exam_id, key).await?;
        self.save().await
    }

    async fn snapshot(&self, exam_id: &str) -> Result<ExamSnapshot, StoreError> {
        self.inner.snapshot(exam_id).await
    }

    async fn derived(&self, exam_id: &str) -> Result<DerivedState, StoreError> {
        self.inner.derived(exam_id).await
    }

    async fn apply(
        &self,
        exam_id: &str,
        expected_version: u64,
        batch: WriteBatch,
    ) -> Result<(), StoreError> {
        let _guard = self.write.lock().await;
        self.inner.apply(exam_id, expected_version, batch).await?;
        self.save().await
    }
}
