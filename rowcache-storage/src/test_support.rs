//! Fixtures for unit tests inside this crate.
//!
//! Integration tests use `rowcache-test-utils` instead; its mocks implement
//! this crate's traits from a separately compiled copy, which unit tests
//! cannot see.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use rowcache_core::{
    Criteria, IdentityError, Model, ModelType, RowCacheResult, StorageError, PRIMARY_KEY_FIELDS,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::ModelLoader;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: u32,
    pub title: String,
}

impl Note {
    pub fn new(id: u32, title: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
        }
    }
}

impl Model for Note {
    fn model_type() -> ModelType {
        ModelType::new("notes", "note")
    }

    fn primary_key(&self) -> Option<String> {
        Some(self.id.to_string())
    }
}

#[derive(Debug, Default)]
pub struct NoteLoader {
    notes: RwLock<Vec<Note>>,
    load_calls: AtomicUsize,
    find_calls: AtomicUsize,
    faulty: AtomicBool,
}

impl NoteLoader {
    pub fn with_notes(notes: Vec<Note>) -> Self {
        Self {
            notes: RwLock::new(notes),
            ..Self::default()
        }
    }

    pub fn set_faulty(&self, faulty: bool) {
        self.faulty.store(faulty, Ordering::SeqCst);
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    fn check_fault(&self, target: &str) -> RowCacheResult<()> {
        if self.faulty.load(Ordering::SeqCst) {
            return Err(StorageError::Fault {
                target: target.to_string(),
                reason: "database unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn matches(note: &Note, criteria: &Criteria) -> bool {
    criteria.iter().all(|(field, value)| {
        let expected = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if PRIMARY_KEY_FIELDS.contains(&field.as_str()) {
            note.id.to_string() == expected
        } else if field == "title" {
            note.title == expected
        } else {
            false
        }
    })
}

impl ModelLoader<Note> for NoteLoader {
    fn load(&self, key: &str) -> RowCacheResult<Option<Note>> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        self.check_fault(key)?;
        let notes = self.notes.read().expect("lock");
        Ok(notes.iter().find(|n| n.id.to_string() == key).cloned())
    }

    fn find(&self, criteria: &Criteria) -> RowCacheResult<Option<Note>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.check_fault(&criteria.to_string())?;
        let notes = self.notes.read().expect("lock");
        let found: Vec<&Note> = notes.iter().filter(|n| matches(n, criteria)).collect();
        match found.as_slice() {
            [] => Ok(None),
            [note] => Ok(Some((*note).clone())),
            _ => Err(IdentityError::AmbiguousLookup {
                model_type: Note::model_type().type_name(),
                criteria: criteria.to_string(),
            }
            .into()),
        }
    }
}
