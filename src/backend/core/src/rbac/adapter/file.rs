//! CSV file adapter: one `p`/`g` record per row.
//!
//! Fields are quoted when they contain separators or quotes, so any value
//! accepted by the store reads back unchanged. Hand-written seed files in the
//! `p, reader, org42, /orgs/get/org42, GET` style load too: fields are
//! trimmed and `#` lines are comments.

use async_trait::async_trait;
use csv_async::{AsyncReaderBuilder, AsyncWriterBuilder, StringRecord, Trim};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::PolicyAdapter;
use crate::error::{Result, WardenError};
use crate::rbac::models::RuleLine;

/// Stores rows in a CSV file. Adds append a record; removals and
/// replacements rewrite the file through a temp file and a rename.
#[derive(Debug)]
pub struct FileAdapter {
    path: PathBuf,
    io: Mutex<()>,
}

impl FileAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_bytes(&self) -> Result<Vec<u8>> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(WardenError::store_unavailable(format!(
                "cannot read {}: {e}",
                self.path.display()
            ))
            .with_source(e)),
        }
    }

    async fn read(&self) -> Result<Vec<RuleLine>> {
        let bytes = self.read_bytes().await?;
        decode(&bytes)
            .await
            .map_err(|e| e.with_context("file", self.path.display().to_string()))
    }

    async fn rewrite(&self, lines: &[RuleLine]) -> Result<()> {
        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "warden_policy".into());
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);

        let body = encode(lines).await?;
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), rows = lines.len(), "Rule file rewritten");
        Ok(())
    }
}

/// Parse the whole file. Duplicate rows collapse to the first occurrence.
async fn decode(bytes: &[u8]) -> Result<Vec<RuleLine>> {
    let mut reader = AsyncReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .comment(Some(b'#'))
        .create_reader(bytes);

    let mut lines = Vec::new();
    let mut record = StringRecord::new();
    while reader.read_record(&mut record).await? {
        let row = record.position().map(|p| p.line()).unwrap_or_default();
        let Some(ptype) = record.get(0) else {
            continue;
        };
        let values: Vec<&str> = record.iter().skip(1).collect();
        let line = RuleLine::from_columns(ptype, &values).map_err(|e| e.with_context("line", row))?;
        if !lines.contains(&line) {
            lines.push(line);
        }
    }
    Ok(lines)
}

/// Render rows as CSV, one record per line.
async fn encode(lines: &[RuleLine]) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    {
        let mut writer = AsyncWriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .create_writer(&mut body);
        for line in lines {
            writer.write_record(line.columns()).await?;
        }
        writer.flush().await?;
    }
    Ok(body)
}

#[async_trait]
impl PolicyAdapter for FileAdapter {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn load_lines(&self) -> Result<Vec<RuleLine>> {
        let _io = self.io.lock().await;
        self.read().await
    }

    async fn append_line(&self, line: &RuleLine) -> Result<()> {
        let _io = self.io.lock().await;
        let existing = self.read_bytes().await?;
        if decode(&existing).await?.contains(line) {
            return Ok(());
        }

        let mut record = Vec::new();
        if existing.last().is_some_and(|b| *b != b'\n') {
            record.push(b'\n');
        }
        record.extend(encode(std::slice::from_ref(line)).await?);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&record).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn remove_line(&self, line: &RuleLine) -> Result<()> {
        let _io = self.io.lock().await;
        let mut lines = self.read().await?;
        let before = lines.len();
        lines.retain(|l| l != line);
        if lines.len() == before {
            return Ok(());
        }
        self.rewrite(&lines).await
    }

    async fn replace_lines(&self, remove: &[RuleLine], add: &[RuleLine]) -> Result<()> {
        let _io = self.io.lock().await;
        let mut lines = self.read().await?;
        lines.retain(|l| !remove.contains(l));
        for line in add {
            if !lines.contains(line) {
                lines.push(line.clone());
            }
        }
        self.rewrite(&lines).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::models::{Grouping, PolicyRule};

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FileAdapter::new(dir.path().join("policy.csv"));
        assert!(adapter.load_lines().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.csv");
        let adapter = FileAdapter::new(&path);

        let rule = RuleLine::from(PolicyRule::new("reader", "org42", "/orgs/get/org42", "GET"));
        let member = RuleLine::from(Grouping::new("u1", "reader", "org42"));
        adapter.append_line(&rule).await.unwrap();
        adapter.append_line(&member).await.unwrap();
        adapter.append_line(&member).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "p,reader,org42,/orgs/get/org42,GET\ng,u1,reader,org42\n");

        adapter.remove_line(&member).await.unwrap();
        assert_eq!(adapter.load_lines().await.unwrap(), vec![rule]);
    }

    #[tokio::test]
    async fn test_corrupt_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.csv");
        std::fs::write(&path, "p, reader, org42\n").unwrap();

        let err = FileAdapter::new(&path).load_lines().await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::StoreCorrupted);
    }

    #[tokio::test]
    async fn test_separators_in_values_are_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.csv");
        let adapter = FileAdapter::new(&path);

        let rule = RuleLine::from(PolicyRule::new("reader", "org42", "/reports/a,b", "GET"));
        let member = RuleLine::from(Grouping::new("u2", "invite", "org \"42\""));
        adapter.append_line(&rule).await.unwrap();
        adapter.append_line(&member).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"/reports/a,b\""), "{text}");
        assert_eq!(adapter.load_lines().await.unwrap(), vec![rule, member]);
    }

    #[tokio::test]
    async fn test_hand_written_seed_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.csv");
        std::fs::write(
            &path,
            "# seeded by hand\n\np, reader, org42, /orgs/get/org42, GET\ng, u1, reader, org42,",
        )
        .unwrap();
        let adapter = FileAdapter::new(&path);

        let member = RuleLine::from(Grouping::new("u2", "reader", "org42"));
        adapter.append_line(&member).await.unwrap();

        let lines = adapter.load_lines().await.unwrap();
        assert_eq!(
            lines,
            vec![
                RuleLine::from(PolicyRule::new("reader", "org42", "/orgs/get/org42", "GET")),
                RuleLine::from(Grouping::new("u1", "reader", "org42")),
                member,
            ]
        );
    }
}
