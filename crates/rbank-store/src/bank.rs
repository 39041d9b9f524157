use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use rbank_core::{BankStats, Embedder, MemoryItem, RbankError, RbankResult, StrategyStore};

/// Reasoning bank persisted as a single pretty-printed JSON array.
///
/// The whole file is read on open and rewritten after every mutation.
pub struct JsonBank {
    path: Option<PathBuf>,
    items: Vec<MemoryItem>,
}

impl JsonBank {
    /// Load the bank at `path`. A missing file yields an empty bank.
    pub fn open(path: &Path) -> RbankResult<Self> {
        let items = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| RbankError::Storage(format!("cannot read bank: {e}")))?;
            if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            Vec::new()
        };
        debug!(path = %path.display(), items = items.len(), "opened reasoning bank");
        Ok(Self {
            path: Some(path.to_path_buf()),
            items,
        })
    }

    /// A bank that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            items: Vec::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the bank via a sibling temp file and rename.
    pub fn save(&self) -> RbankResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| RbankError::Storage(format!("cannot create bank directory: {e}")))?;
        }
        let json = serde_json::to_string_pretty(&self.items)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| RbankError::Storage(format!("cannot write bank: {e}")))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| RbankError::Storage(format!("cannot replace bank: {e}")))?;
        Ok(())
    }
}

fn validate(item: &MemoryItem) -> RbankResult<()> {
    if item.title.trim().is_empty() {
        return Err(RbankError::InvalidInput(format!(
            "memory from {} has an empty title",
            item.source_problem_id
        )));
    }
    Ok(())
}

impl StrategyStore for JsonBank {
    fn add(&mut self, item: MemoryItem) -> RbankResult<()> {
        self.add_many(vec![item]).map(|_| ())
    }

    fn add_many(&mut self, items: Vec<MemoryItem>) -> RbankResult<usize> {
        for item in &items {
            validate(item)?;
        }
        let before = self.items.len();
        let n = items.len();
        self.items.extend(items);
        if let Err(e) = self.save() {
            // Keep memory and disk in step.
            self.items.truncate(before);
            return Err(e);
        }
        Ok(n)
    }

    fn all(&self) -> &[MemoryItem] {
        &self.items
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn contains_source(&self, problem_id: &str) -> bool {
        self.items.iter().any(|m| m.source_problem_id == problem_id)
    }

    fn clear(&mut self) -> RbankResult<()> {
        let previous = std::mem::take(&mut self.items);
        if let Err(e) = self.save() {
            self.items = previous;
            return Err(e);
        }
        Ok(())
    }

    fn embed_missing(
        &mut self,
        embedder: &dyn Embedder,
        batch_size: usize,
        force: bool,
    ) -> RbankResult<usize> {
        let pending: Vec<usize> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, m)| force || m.embedding.is_none())
            .map(|(i, _)| i)
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let mut embedded = 0;
        for chunk in pending.chunks(batch_size.max(1)) {
            let texts: Vec<String> = chunk.iter().map(|&i| self.items[i].embedding_text()).collect();
            let text_refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
            let vectors = embedder.embed_batch(&text_refs)?;
            if vectors.len() != chunk.len() {
                return Err(RbankError::Embedding(format!(
                    "expected {} embeddings, got {}",
                    chunk.len(),
                    vectors.len()
                )));
            }
            for (&i, v) in chunk.iter().zip(vectors) {
                self.items[i].embedding = Some(v);
                embedded += 1;
            }
        }

        self.save()?;
        info!(embedded, "embedded reasoning bank items");
        Ok(embedded)
    }

    fn stats(&self) -> BankStats {
        let from_successes = self.items.iter().filter(|m| m.success).count();
        let sources: HashSet<&str> = self
            .items
            .iter()
            .map(|m| m.source_problem_id.as_str())
            .collect();
        BankStats {
            total_items: self.items.len(),
            from_successes,
            from_failures: self.items.len() - from_successes,
            embedded: self.items.iter().filter(|m| m.embedding.is_some()).count(),
            source_problems: sources.len(),
            oldest_item: self.items.iter().map(|m| m.created_at).min(),
            newest_item: self.items.iter().map(|m| m.created_at).max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    impl Embedder for CountingEmbedder {
        fn embed(&self, text: &str) -> RbankResult<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }

        fn embed_batch(&self, texts: &[&str]) -> RbankResult<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    fn make_item(source: &str, success: bool) -> MemoryItem {
        MemoryItem::new(
            format!("Strategy for {source}"),
            "one line".into(),
            "details".into(),
            source.into(),
            success,
        )
    }

    #[test]
    fn test_failed_save_leaves_bank_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let mut bank = JsonBank::open(&blocker.join("bank.json")).unwrap();

        assert!(matches!(
            bank.add(make_item("gsm8k_1", true)),
            Err(RbankError::Storage(_))
        ));
        assert!(bank
            .add_many(vec![make_item("gsm8k_2", true), make_item("gsm8k_3", false)])
            .is_err());
        assert!(bank.is_empty());
        assert!(!bank.contains_source("gsm8k_1"));
    }

    #[test]
    fn test_failed_clear_keeps_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.json");
        let mut bank = JsonBank::open(&path).unwrap();
        bank.add(make_item("gsm8k_1", true)).unwrap();

        // Swap the target for a directory so the rename fails.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), "x").unwrap();

        assert!(bank.clear().is_err());
        assert_eq!(bank.len(), 1);
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let bank = JsonBank::open(&dir.path().join("nope.json")).unwrap();
        assert!(bank.is_empty());
    }

    #[test]
    fn test_add_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bank.json");
        {
            let mut bank = JsonBank::open(&path).unwrap();
            bank.add(make_item("p1", true)).unwrap();
            bank.add_many(vec![make_item("p2", false), make_item("p2", false)])
                .unwrap();
        }
        let bank = JsonBank::open(&path).unwrap();
        assert_eq!(bank.len(), 3);
        assert_eq!(bank.all()[0].source_problem_id, "p1");
        assert!(!bank.all()[2].success);
        assert!(!path.with_extension("json.tmp").exists());

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("[\n  {"));
    }

    #[test]
    fn test_stored_items_have_title_and_iso_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.json");
        let mut bank = JsonBank::open(&path).unwrap();
        bank.add(make_item("p1", true)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        for entry in raw.as_array().unwrap() {
            assert!(!entry["title"].as_str().unwrap().trim().is_empty());
            let stamp = entry["created_at"].as_str().unwrap();
            assert!(DateTime::parse_from_rfc3339(stamp).is_ok());
        }
    }

    #[test]
    fn test_reject_empty_title() {
        let mut bank = JsonBank::in_memory();
        let mut item = make_item("p1", true);
        item.title = "  ".into();
        assert!(matches!(bank.add(item.clone()), Err(RbankError::InvalidInput(_))));
        assert!(bank.add_many(vec![make_item("p2", true), item]).is_err());
        assert!(bank.is_empty());
    }

    #[test]
    fn test_contains_source_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.json");
        let mut bank = JsonBank::open(&path).unwrap();
        bank.add(make_item("gsm8k_1", true)).unwrap();
        assert!(bank.contains_source("gsm8k_1"));
        assert!(!bank.contains_source("gsm8k_2"));

        bank.clear().unwrap();
        assert!(bank.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "[]");
    }

    #[test]
    fn test_loads_legacy_bank_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.json");
        std::fs::write(
            &path,
            r#"[{"title":"T","description":"D","content":"C","source_problem_id":"gsm8k_0",
                "success":true,"created_at":"2025-01-02T03:04:05.000006","embedding":[0.5,0.5]}]"#,
        )
        .unwrap();
        let bank = JsonBank::open(&path).unwrap();
        assert_eq!(bank.len(), 1);
        assert_eq!(bank.all()[0].embedding.as_deref(), Some(&[0.5, 0.5][..]));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonBank::open(&path),
            Err(RbankError::Serialization(_))
        ));
    }

    #[test]
    fn test_embed_missing_batches_and_skips_embedded() {
        let mut bank = JsonBank::in_memory();
        let mut pre = make_item("p0", true);
        pre.embedding = Some(vec![9.0, 9.0]);
        bank.add(pre).unwrap();
        for i in 1..=5 {
            bank.add(make_item(&format!("p{i}"), true)).unwrap();
        }

        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
        };
        let n = bank.embed_missing(&embedder, 2, false).unwrap();
        assert_eq!(n, 5);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(bank.all()[0].embedding.as_deref(), Some(&[9.0, 9.0][..]));
        assert!(bank.all().iter().all(|m| m.embedding.is_some()));

        assert_eq!(bank.embed_missing(&embedder, 2, false).unwrap(), 0);
        assert_eq!(bank.embed_missing(&embedder, 10, true).unwrap(), 6);
        assert_ne!(bank.all()[0].embedding.as_deref(), Some(&[9.0, 9.0][..]));
    }

    #[test]
    fn test_stats() {
        let mut bank = JsonBank::in_memory();
        assert!(bank.stats().oldest_item.is_none());
        bank.add(make_item("a", true)).unwrap();
        bank.add(make_item("a", false)).unwrap();
        let mut item = make_item("b", false);
        item.embedding = Some(vec![1.0]);
        item.created_at = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        bank.add(item).unwrap();

        let stats = bank.stats();
        assert_eq!(stats.total_items, 3);
        assert_eq!(stats.from_successes, 1);
        assert_eq!(stats.from_failures, 2);
        assert_eq!(stats.embedded, 1);
        assert_eq!(stats.source_problems, 2);
        assert_eq!(stats.oldest_item.unwrap().timestamp(), 0);
    }
}
