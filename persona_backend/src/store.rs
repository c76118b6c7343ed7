use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Every non-alphanumeric character becomes `_`, then lowercase.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_lowercase()
}

/// A directory of `<sanitized key>.json` files, each holding a list of records.
///
/// Writing to an existing key appends. A file holding a single object (older
/// format) is read as a one-element list and rewritten as a list on the next append.
pub struct JsonListStore<T> {
    dir: PathBuf,
    write_lock: Mutex<()>,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonListStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
            _record: PhantomData,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_name(key)))
    }

    /// Append `record` under `key` and return the file path.
    pub async fn append(&self, key: &str, record: &T) -> Result<PathBuf> {
        let _guard = self.write_lock.lock().await;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create directory {:?}", self.dir))?;

        let path = self.path_for(key);
        let mut entries = match read_json(&path).await? {
            Some(Value::Array(items)) => items,
            Some(single) => vec![single],
            None => Vec::new(),
        };
        entries.push(serde_json::to_value(record).context("Failed to serialize record")?);

        let contents = serde_json::to_string_pretty(&Value::Array(entries))
            .context("Failed to serialize record list")?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, contents)
            .await
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("Failed to move {:?} into place", tmp_path))?;

        tracing::debug!("Appended record to {:?}", path);
        Ok(path)
    }

    /// All records stored under `key`, or `None` when there is no file.
    pub async fn load(&self, key: &str) -> Result<Option<Vec<T>>> {
        let path = self.path_for(key);
        match read_json(&path).await? {
            Some(value) => Ok(Some(records_from_value(value).with_context(|| {
                format!("Unexpected record shape in {:?}", path)
            })?)),
            None => Ok(None),
        }
    }

    /// File stems present in the store, sorted.
    pub async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .json_files()
            .await?
            .iter()
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect())
    }

    /// Every record in every file. Unreadable files are skipped with a warning.
    pub async fn load_all(&self) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for path in self.json_files().await? {
            let value = match read_json(&path).await {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(error) => {
                    tracing::warn!("Invalid JSON in {:?}: {:#}", path, error);
                    continue;
                }
            };
            match records_from_value(value) {
                Ok(mut items) => records.append(&mut items),
                Err(error) => tracing::warn!("Skipping {:?}: {}", path, error),
            }
        }
        Ok(records)
    }

    async fn json_files(&self) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(error).with_context(|| format!("Failed to read {:?}", self.dir))
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

async fn read_json(path: &Path) -> Result<Option<Value>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => serde_json::from_str(&contents)
            .map(Some)
            .with_context(|| format!("Failed to parse {:?}", path)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error).with_context(|| format!("Failed to read {:?}", path)),
    }
}

fn records_from_value<T: DeserializeOwned>(value: Value) -> serde_json::Result<Vec<T>> {
    match value {
        Value::Array(items) => items.into_iter().map(serde_json::from_value).collect(),
        single => Ok(vec![serde_json::from_value(single)?]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        name: String,
        text: String,
    }

    fn note(name: &str, text: &str) -> Note {
        Note {
            name: name.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn sanitize_replaces_punctuation_and_lowercases() {
        assert_eq!(sanitize_name("Coffee Mug!"), "coffee_mug_");
        assert_eq!(sanitize_name("R2-D2"), "r2_d2");
        assert_eq!(sanitize_name("Café"), "café");
    }

    #[tokio::test]
    async fn appending_same_key_twice_keeps_both_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonListStore::<Note>::new(dir.path());

        let first = store.append("Coffee Mug", &note("Coffee Mug", "one")).await.expect("first");
        let second = store.append("coffee mug", &note("coffee mug", "two")).await.expect("second");
        assert_eq!(first, second);

        let stored = store.load("COFFEE MUG").await.expect("load").expect("present");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].text, "one");
        assert_eq!(stored[1].text, "two");
    }

    #[tokio::test]
    async fn single_object_files_are_promoted_to_lists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonListStore::<Note>::new(dir.path());
        let legacy = serde_json::to_string(&note("lamp", "legacy")).expect("json");
        std::fs::write(store.path_for("lamp"), legacy).expect("seed");

        store.append("lamp", &note("lamp", "new")).await.expect("append");

        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(store.path_for("lamp")).expect("read"))
                .expect("parse");
        assert_eq!(raw.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn load_all_skips_invalid_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonListStore::<Note>::new(dir.path());
        store.append("a", &note("a", "x")).await.expect("a");
        store.append("b", &note("b", "y")).await.expect("b");
        std::fs::write(dir.path().join("broken.json"), "{not json").expect("seed broken");

        let all = store.load_all().await.expect("load all");
        assert_eq!(all.len(), 2);
        assert_eq!(
            store.list_keys().await.expect("keys"),
            vec!["a".to_string(), "b".to_string(), "broken".to_string()]
        );
    }

    #[tokio::test]
    async fn missing_directory_reads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonListStore::<Note>::new(dir.path().join("nope"));
        assert!(store.load_all().await.expect("load all").is_empty());
        assert!(store.load("anything").await.expect("load").is_none());
    }
}
