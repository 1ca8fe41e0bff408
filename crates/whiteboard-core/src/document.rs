//! Room document state: pages, the active page, and the class lifecycle.
//!
//! `Document` upholds two invariants for every value, including ones read
//! from storage or the wire:
//! - `pages` is never empty
//! - `current_page_index` always indexes an existing page

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

use crate::operations::{create_empty_page, Page, PageId};

#[derive(Debug, Error, PartialEq)]
pub enum DocumentError {
    #[error("Page index {index} out of range (document has {len} pages)")]
    PageOutOfRange { index: usize, len: usize },

    #[error("Invalid class status transition: {from} -> {to}")]
    InvalidTransition { from: ClassStatus, to: ClassStatus },

    #[error("Unknown role: {0} (expected \"trainer\" or \"trainee\")")]
    UnknownRole(String),
}

pub type Result<T> = std::result::Result<T, DocumentError>;

/// Lifecycle of a class session. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassStatus {
    #[default]
    NotStarted,
    Live,
    Ended,
}

impl ClassStatus {
    /// `NOT_STARTED -> LIVE -> ENDED`, nothing else.
    pub fn can_transition_to(self, next: ClassStatus) -> bool {
        matches!(
            (self, next),
            (ClassStatus::NotStarted, ClassStatus::Live) | (ClassStatus::Live, ClassStatus::Ended)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClassStatus::NotStarted => "NOT_STARTED",
            ClassStatus::Live => "LIVE",
            ClassStatus::Ended => "ENDED",
        }
    }
}

impl Display for ClassStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Participant role within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Trainer,
    Trainee,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Role::Trainer => f.write_str("trainer"),
            Role::Trainee => f.write_str("trainee"),
        }
    }
}

impl FromStr for Role {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trainer" => Ok(Role::Trainer),
            "trainee" => Ok(Role::Trainee),
            _ => Err(DocumentError::UnknownRole(s.to_string())),
        }
    }
}

/// The one authorization predicate: only a trainer in a live class may edit.
pub fn can_edit(role: Role, status: ClassStatus) -> bool {
    role == Role::Trainer && status == ClassStatus::Live
}

/// Deserialization shape. Converted into a normalized `Document`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredDocument {
    #[serde(default)]
    pages: Vec<Page>,
    #[serde(default)]
    current_page_index: usize,
    #[serde(default)]
    class_status: ClassStatus,
}

impl From<StoredDocument> for Document {
    fn from(stored: StoredDocument) -> Self {
        Document::from_parts(stored.pages, stored.current_page_index, stored.class_status)
    }
}

/// Pages plus the active page index and class status.
///
/// JSON shape: `{"pages":[...],"currentPageIndex":0,"classStatus":"LIVE"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredDocument")]
pub struct Document {
    pages: Vec<Page>,
    current_page_index: usize,
    class_status: ClassStatus,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            pages: vec![create_empty_page()],
            current_page_index: 0,
            class_status: ClassStatus::NotStarted,
        }
    }
}

/// Substitute a single fresh page for an empty list.
fn normalize_pages(pages: Vec<Page>) -> Vec<Page> {
    if pages.is_empty() {
        vec![create_empty_page()]
    } else {
        pages
    }
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document from untrusted parts, normalizing empty pages and
    /// clamping the index.
    pub fn from_parts(pages: Vec<Page>, current_page_index: usize, class_status: ClassStatus) -> Self {
        let pages = normalize_pages(pages);
        let current_page_index = current_page_index.min(pages.len() - 1);
        Self {
            pages,
            current_page_index,
            class_status,
        }
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn current_page_index(&self) -> usize {
        self.current_page_index
    }

    pub fn class_status(&self) -> ClassStatus {
        self.class_status
    }

    pub fn current_page(&self) -> &Page {
        &self.pages[self.current_page_index]
    }

    /// Position of the page with the given id.
    pub fn position_of(&self, id: &PageId) -> Option<usize> {
        self.pages.iter().position(|p| &p.id == id)
    }

    /// Replace all pages wholesale, clamping the index if the list shrank.
    pub fn replace_pages(&mut self, pages: Vec<Page>) {
        self.pages = normalize_pages(pages);
        self.current_page_index = self.current_page_index.min(self.pages.len() - 1);
    }

    /// Replace pages, index, and status from another document.
    pub fn overwrite(&mut self, other: Document) {
        *self = other;
    }

    /// Apply `f` to the page at `index`. Returns false when there is no such page.
    pub fn update_page(&mut self, index: usize, f: impl FnOnce(&Page) -> Page) -> bool {
        match self.pages.get(index) {
            Some(page) => {
                let next = f(page);
                self.pages[index] = next;
                true
            }
            None => false,
        }
    }

    /// Append a page and return its index. Does not move the current index.
    pub fn push_page(&mut self, page: Page) -> usize {
        self.pages.push(page);
        self.pages.len() - 1
    }

    pub fn set_current_page_index(&mut self, index: usize) -> Result<()> {
        if index >= self.pages.len() {
            return Err(DocumentError::PageOutOfRange {
                index,
                len: self.pages.len(),
            });
        }
        self.current_page_index = index;
        Ok(())
    }

    /// Move to the page after the current one, clamped to the last page.
    pub fn advance_page(&mut self) {
        self.current_page_index = (self.current_page_index + 1).min(self.pages.len() - 1);
    }

    /// Apply a lifecycle transition, rejecting anything but a forward step.
    pub fn transition(&mut self, next: ClassStatus) -> Result<()> {
        if !self.class_status.can_transition_to(next) {
            return Err(DocumentError::InvalidTransition {
                from: self.class_status,
                to: next,
            });
        }
        self.class_status = next;
        Ok(())
    }

    /// Overwrite the status as received from the trainer.
    pub fn set_class_status(&mut self, status: ClassStatus) {
        self.class_status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{add_operation_to_page, create_stroke, Point, Tool};

    // ===== ClassStatus =====

    #[test]
    fn test_status_transitions_are_monotonic() {
        use ClassStatus::*;
        assert!(NotStarted.can_transition_to(Live));
        assert!(Live.can_transition_to(Ended));
        assert!(!NotStarted.can_transition_to(Ended));
        assert!(!Live.can_transition_to(NotStarted));
        assert!(!Ended.can_transition_to(Live));
        assert!(!Live.can_transition_to(Live));
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_string(&ClassStatus::NotStarted).unwrap(), "\"NOT_STARTED\"");
        assert_eq!(serde_json::to_string(&ClassStatus::Live).unwrap(), "\"LIVE\"");
        assert_eq!(ClassStatus::Ended.to_string(), "ENDED");
    }

    // ===== Role / can_edit =====

    #[test]
    fn test_role_parse() {
        assert_eq!("trainer".parse::<Role>().unwrap(), Role::Trainer);
        assert_eq!("Trainee".parse::<Role>().unwrap(), Role::Trainee);
        assert!(matches!("admin".parse::<Role>(), Err(DocumentError::UnknownRole(_))));
    }

    #[test]
    fn test_can_edit_requires_trainer_and_live() {
        assert!(can_edit(Role::Trainer, ClassStatus::Live));
        assert!(!can_edit(Role::Trainer, ClassStatus::NotStarted));
        assert!(!can_edit(Role::Trainer, ClassStatus::Ended));
        assert!(!can_edit(Role::Trainee, ClassStatus::Live));
    }

    // ===== Invariants =====

    #[test]
    fn test_new_document_has_one_page() {
        let doc = Document::new();
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.current_page_index(), 0);
        assert_eq!(doc.class_status(), ClassStatus::NotStarted);
    }

    #[test]
    fn test_from_parts_normalizes() {
        let doc = Document::from_parts(vec![], 7, ClassStatus::Live);
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.current_page_index(), 0);

        let pages = vec![create_empty_page(), create_empty_page()];
        let doc = Document::from_parts(pages, 9, ClassStatus::Live);
        assert_eq!(doc.current_page_index(), 1);
    }

    #[test]
    fn test_replace_pages_clamps_index() {
        let mut doc = Document::new();
        doc.push_page(create_empty_page());
        doc.push_page(create_empty_page());
        doc.set_current_page_index(2).unwrap();

        doc.replace_pages(vec![create_empty_page()]);
        assert_eq!(doc.current_page_index(), 0);

        doc.replace_pages(vec![]);
        assert_eq!(doc.page_count(), 1);
    }

    #[test]
    fn test_set_current_page_index_out_of_range() {
        let mut doc = Document::new();
        let err = doc.set_current_page_index(3).unwrap_err();
        assert_eq!(err, DocumentError::PageOutOfRange { index: 3, len: 1 });
        assert_eq!(doc.current_page_index(), 0);
    }

    #[test]
    fn test_advance_page_clamps() {
        let mut doc = Document::new();
        doc.push_page(create_empty_page());
        doc.advance_page();
        assert_eq!(doc.current_page_index(), 1);
        doc.advance_page();
        assert_eq!(doc.current_page_index(), 1);
    }

    #[test]
    fn test_transition_rejects_backwards() {
        let mut doc = Document::new();
        doc.transition(ClassStatus::Live).unwrap();
        doc.transition(ClassStatus::Ended).unwrap();
        let err = doc.transition(ClassStatus::Live).unwrap_err();
        assert!(matches!(err, DocumentError::InvalidTransition { .. }));
        assert_eq!(doc.class_status(), ClassStatus::Ended);
    }

    #[test]
    fn test_update_page_missing_index() {
        let mut doc = Document::new();
        assert!(!doc.update_page(4, |p| p.clone()));
    }

    // ===== JSON =====

    #[test]
    fn test_json_shape() {
        let mut doc = Document::new();
        doc.update_page(0, |p| {
            add_operation_to_page(
                p,
                create_stroke(vec![Point::new(0.0, 0.0)], "#000", 2.0, Tool::Pen),
            )
        });
        let json = serde_json::to_value(&doc).unwrap();

        assert_eq!(json["currentPageIndex"], 0);
        assert_eq!(json["classStatus"], "NOT_STARTED");
        assert_eq!(json["pages"][0]["operations"][0]["type"], "stroke");

        let parsed: Document = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn test_json_missing_fields_default() {
        let doc: Document = serde_json::from_str(r#"{"pages":[{"id":"page_a","operations":[]}]}"#).unwrap();
        assert_eq!(doc.current_page_index(), 0);
        assert_eq!(doc.class_status(), ClassStatus::NotStarted);
        assert_eq!(doc.pages()[0].id.as_str(), "page_a");
    }

    #[test]
    fn test_json_empty_pages_normalized() {
        let doc: Document =
            serde_json::from_str(r#"{"pages":[],"currentPageIndex":4,"classStatus":"LIVE"}"#).unwrap();
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.current_page_index(), 0);
        assert_eq!(doc.class_status(), ClassStatus::Live);
    }
}
