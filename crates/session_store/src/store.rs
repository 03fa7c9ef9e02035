use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::SessionStoreError;
use crate::paths::{session_file_name, session_root};
use crate::schema::{SessionEntry, SessionEntryKind, SessionHeader};

/// An open transcript file. Entries are appended and flushed one line at a
/// time; nothing is ever rewritten.
#[derive(Debug)]
pub struct SessionStore {
    pub(crate) path: PathBuf,
    file: File,
    pub(crate) header: SessionHeader,
    pub(crate) entries: Vec<SessionEntry>,
    pub(crate) index_by_id: HashMap<String, usize>,
    pub(crate) current_leaf_id: Option<String>,
}

enum Record {
    Header(SessionHeader),
    Entry(SessionEntry),
}

impl SessionStore {
    /// Creates `<cwd>/.coding_agent/sessions/<ts>_<uuid>.jsonl` and writes its
    /// header line.
    pub fn create_new(cwd: &Path, model: &str) -> Result<Self, SessionStoreError> {
        if !cwd.is_absolute() {
            return Err(SessionStoreError::RelativeCwd {
                path: cwd.to_path_buf(),
                cwd: cwd.display().to_string(),
            });
        }

        let root = session_root(cwd);
        fs::create_dir_all(&root)
            .map_err(|source| SessionStoreError::io("creating session directory", &root, source))?;

        let session_id = Uuid::new_v4().to_string();
        let created_at = now_rfc3339()?;
        let path = root.join(session_file_name(&created_at, &session_id));
        let header = SessionHeader::v1(session_id, created_at, cwd.display().to_string(), model);

        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|source| SessionStoreError::io("creating session file", &path, source))?;

        let mut store = Self {
            path,
            file,
            header,
            entries: Vec::new(),
            index_by_id: HashMap::new(),
            current_leaf_id: None,
        };
        let header_value = serde_json::to_value(&store.header)
            .map_err(|source| SessionStoreError::Serialize {
                path: store.path.clone(),
                source,
            })?;
        store.write_line(&header_value)?;
        Ok(store)
    }

    /// Opens and fully validates an existing transcript. Further appends
    /// continue from its last entry.
    pub fn open(path: &Path) -> Result<Self, SessionStoreError> {
        let path = path.to_path_buf();
        let read_file = File::open(&path)
            .map_err(|source| SessionStoreError::io("opening session file", &path, source))?;
        let reader = BufReader::new(read_file);

        let mut header: Option<SessionHeader> = None;
        let mut entries = Vec::new();
        let mut index_by_id = HashMap::new();

        for (line_index, line_result) in reader.lines().enumerate() {
            let line = line_index + 1;
            let text = line_result.map_err(|source| SessionStoreError::ReadLine {
                path: path.clone(),
                line,
                source,
            })?;
            if text.trim().is_empty() {
                continue;
            }

            match (parse_record(&path, line, &text)?, header.is_some()) {
                (Record::Header(parsed), false) => {
                    validate_header(&path, line, &parsed)?;
                    header = Some(parsed);
                }
                (Record::Entry(_), false) => {
                    return Err(SessionStoreError::NotAHeader { path, line });
                }
                (Record::Header(_), true) => {
                    return Err(SessionStoreError::NotAnEntry { path, line });
                }
                (Record::Entry(entry), true) => {
                    validate_entry(&path, line, &entry, &index_by_id)?;
                    index_by_id.insert(entry.id.clone(), entries.len());
                    entries.push(entry);
                }
            }
        }

        let header = header.ok_or_else(|| SessionStoreError::MissingHeader { path: path.clone() })?;
        let current_leaf_id = entries.last().map(|entry: &SessionEntry| entry.id.clone());

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|source| {
                SessionStoreError::io("opening session file for append", &path, source)
            })?;

        Ok(Self {
            path,
            file,
            header,
            entries,
            index_by_id,
            current_leaf_id,
        })
    }

    /// Newest transcript under `<cwd>/.coding_agent/sessions/`, by file name.
    /// File names start with the creation timestamp, so lexical order is
    /// creation order.
    pub fn latest_session_path(cwd: &Path) -> Result<PathBuf, SessionStoreError> {
        let root = session_root(cwd);
        let read_dir = match fs::read_dir(&root) {
            Ok(read_dir) => read_dir,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionStoreError::NoSessions { root });
            }
            Err(source) => {
                return Err(SessionStoreError::io("listing session directory", &root, source));
            }
        };

        read_dir
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "jsonl"))
            .max_by(|left, right| left.file_name().cmp(&right.file_name()))
            .ok_or(SessionStoreError::NoSessions { root })
    }

    /// Appends a fully specified entry after validating it against the
    /// existing graph. The in-memory state only changes once the line is
    /// on disk.
    pub fn append(&mut self, entry: SessionEntry) -> Result<(), SessionStoreError> {
        let line = self.entries.len() + 2;
        validate_entry(&self.path, line, &entry, &self.index_by_id)?;

        let value = serde_json::to_value(&entry).map_err(|source| SessionStoreError::Serialize {
            path: self.path.clone(),
            source,
        })?;
        self.write_line(&value)?;

        self.index_by_id.insert(entry.id.clone(), self.entries.len());
        self.current_leaf_id = Some(entry.id.clone());
        self.entries.push(entry);
        Ok(())
    }

    /// Appends `kind` as a child of the current leaf with a fresh id and
    /// timestamp. Returns the new entry id.
    pub fn record(&mut self, kind: SessionEntryKind) -> Result<String, SessionStoreError> {
        let id = Uuid::new_v4().to_string();
        let entry = SessionEntry::new(id.clone(), self.current_leaf_id.clone(), now_rfc3339()?, kind);
        self.append(entry)?;
        Ok(id)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn header(&self) -> &SessionHeader {
        &self.header
    }

    #[must_use]
    pub fn entries(&self) -> &[SessionEntry] {
        &self.entries
    }

    #[must_use]
    pub fn current_leaf_id(&self) -> Option<&str> {
        self.current_leaf_id.as_deref()
    }

    fn write_line(&mut self, value: &Value) -> Result<(), SessionStoreError> {
        let mut line = value.to_string();
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|source| SessionStoreError::io("appending session line", &self.path, source))
    }
}

fn parse_record(path: &Path, line: usize, text: &str) -> Result<Record, SessionStoreError> {
    let json_error = |source| SessionStoreError::Json {
        path: path.to_path_buf(),
        line,
        source,
    };
    let value: Value = serde_json::from_str(text).map_err(json_error)?;
    let record_type = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match record_type.as_str() {
        "session" => serde_json::from_value(value)
            .map(Record::Header)
            .map_err(json_error),
        "entry" => serde_json::from_value(value)
            .map(Record::Entry)
            .map_err(json_error),
        _ => Err(SessionStoreError::UnknownRecordType {
            path: path.to_path_buf(),
            line,
            found: record_type,
        }),
    }
}

fn validate_header(path: &Path, line: usize, header: &SessionHeader) -> Result<(), SessionStoreError> {
    if header.version != 1 {
        return Err(SessionStoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            line,
            found: header.version,
        });
    }

    validate_rfc3339(path, line, "created_at", &header.created_at)?;

    if !Path::new(&header.cwd).is_absolute() {
        return Err(SessionStoreError::RelativeCwd {
            path: path.to_path_buf(),
            cwd: header.cwd.clone(),
        });
    }

    Ok(())
}

fn validate_entry(
    path: &Path,
    line: usize,
    entry: &SessionEntry,
    index_by_id: &HashMap<String, usize>,
) -> Result<(), SessionStoreError> {
    validate_rfc3339(path, line, "ts", &entry.ts)?;

    if index_by_id.contains_key(&entry.id) {
        return Err(SessionStoreError::DuplicateEntryId {
            path: path.to_path_buf(),
            line,
            id: entry.id.clone(),
        });
    }

    // Parents must precede their children, which also rules out cycles on disk.
    if let Some(parent_id) = &entry.parent_id {
        if !index_by_id.contains_key(parent_id) {
            return Err(SessionStoreError::DanglingParent {
                path: path.to_path_buf(),
                line,
                entry_id: entry.id.clone(),
                parent_id: parent_id.clone(),
            });
        }
    }

    Ok(())
}

fn validate_rfc3339(
    path: &Path,
    line: usize,
    field: &'static str,
    value: &str,
) -> Result<(), SessionStoreError> {
    if OffsetDateTime::parse(value, &Rfc3339).is_err() {
        return Err(SessionStoreError::InvalidTimestamp {
            path: path.to_path_buf(),
            line,
            field,
            value: value.to_string(),
        });
    }

    Ok(())
}

fn now_rfc3339() -> Result<String, SessionStoreError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(SessionStoreError::Clock)
}
