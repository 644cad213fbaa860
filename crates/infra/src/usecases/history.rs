//! Cursor pagination of chat histories.
//!
//! Pages run newest first. A request names either a page size or the cursor
//! returned with the previous page, never both. The cursor is base64url over
//! `{"lastCreatedAt", "lastId", "pageSize"}` and carries the page size along.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use chrono::{DateTime, Utc};
use parley_core::MessageId;
use serde::Deserialize;
use serde_json::json;

use super::UseCaseError;
use crate::store::{HistoryPosition, Message};

pub const MIN_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

fn check_page_size(page_size: usize) -> Result<(), String> {
    if (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
        Ok(())
    } else {
        Err(format!(
            "page size must be between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}, got {page_size}"
        ))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub last_created_at: DateTime<Utc>,
    pub last_id: MessageId,
    pub page_size: usize,
}

impl Cursor {
    pub fn encode(&self) -> String {
        let body = json!({
            "lastCreatedAt": self.last_created_at,
            "lastId": self.last_id,
            "pageSize": self.page_size,
        });
        URL_SAFE.encode(body.to_string())
    }

    pub fn decode(raw: &str) -> Result<Self, UseCaseError> {
        let bytes = URL_SAFE
            .decode(raw.trim())
            .map_err(|e| UseCaseError::InvalidCursor(format!("base64: {e}")))?;
        let cursor: Cursor = serde_json::from_slice(&bytes)
            .map_err(|e| UseCaseError::InvalidCursor(format!("json: {e}")))?;
        check_page_size(cursor.page_size).map_err(UseCaseError::InvalidCursor)?;
        Ok(cursor)
    }

    fn position(&self) -> HistoryPosition {
        HistoryPosition {
            created_at: self.last_created_at,
            id: self.last_id,
        }
    }
}

/// The page a history call asks for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page_size: usize,
    pub from: Option<HistoryPosition>,
}

impl PageRequest {
    /// The first page.
    pub fn first(page_size: usize) -> Result<Self, UseCaseError> {
        check_page_size(page_size).map_err(UseCaseError::InvalidRequest)?;
        Ok(Self {
            page_size,
            from: None,
        })
    }

    /// Build from the raw request fields. A zero page size and an empty cursor
    /// count as absent.
    pub fn from_parts(page_size: Option<usize>, cursor: Option<&str>) -> Result<Self, UseCaseError> {
        let page_size = page_size.filter(|n| *n != 0);
        let cursor = cursor.map(str::trim).filter(|c| !c.is_empty());

        match (page_size, cursor) {
            (Some(n), None) => Self::first(n),
            (None, Some(raw)) => {
                let cursor = Cursor::decode(raw)?;
                Ok(Self {
                    page_size: cursor.page_size,
                    from: Some(cursor.position()),
                })
            }
            _ => Err(UseCaseError::InvalidRequest(
                "exactly one of pageSize and cursor is required".into(),
            )),
        }
    }

    /// Rows to fetch: one extra tells whether another page exists.
    pub(crate) fn fetch_limit(&self) -> usize {
        self.page_size + 1
    }
}

/// One page of messages, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub messages: Vec<Message>,
    pub next: Option<Cursor>,
}

impl Page {
    /// Trim `rows` (fetched with [`PageRequest::fetch_limit`]) to the page
    /// size and derive the next cursor from the last kept row.
    pub(crate) fn cut(mut rows: Vec<Message>, page: &PageRequest) -> Self {
        if rows.len() <= page.page_size {
            return Self {
                messages: rows,
                next: None,
            };
        }
        rows.truncate(page.page_size);
        let next = rows.last().map(|last| Cursor {
            last_created_at: last.created_at,
            last_id: last.id,
            page_size: page.page_size,
        });
        Self {
            messages: rows,
            next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewMessage;
    use parley_core::{ChatId, ProblemId, RequestId, UserId};

    fn rows(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                NewMessage::client_visible(
                    RequestId::new(),
                    ProblemId::new(),
                    ChatId::new(),
                    UserId::new(),
                    format!("m{i}"),
                )
                .into_message(Utc::now())
            })
            .collect()
    }

    #[test]
    fn cursor_survives_the_wire() {
        let cursor = Cursor {
            last_created_at: Utc::now(),
            last_id: MessageId::new(),
            page_size: 20,
        };
        let raw = cursor.encode();
        assert!(!raw.contains('+') && !raw.contains('/'));
        assert_eq!(Cursor::decode(&raw).unwrap(), cursor);
    }

    #[test]
    fn malformed_cursors_are_rejected() {
        let no_position = URL_SAFE.encode(r#"{"pageSize":10}"#);
        for raw in ["%%%", "bm90IGpzb24=", no_position.as_str()] {
            assert!(matches!(Cursor::decode(raw), Err(UseCaseError::InvalidCursor(_))));
        }

        let oversized = Cursor {
            last_created_at: Utc::now(),
            last_id: MessageId::new(),
            page_size: MAX_PAGE_SIZE + 1,
        };
        assert!(matches!(
            Cursor::decode(&oversized.encode()),
            Err(UseCaseError::InvalidCursor(_))
        ));
    }

    #[test]
    fn exactly_one_of_page_size_and_cursor() {
        let cursor = Cursor {
            last_created_at: Utc::now(),
            last_id: MessageId::new(),
            page_size: 15,
        }
        .encode();

        assert!(matches!(
            PageRequest::from_parts(None, None),
            Err(UseCaseError::InvalidRequest(_))
        ));
        assert!(matches!(
            PageRequest::from_parts(Some(10), Some(cursor.as_str())),
            Err(UseCaseError::InvalidRequest(_))
        ));
        assert!(matches!(
            PageRequest::from_parts(Some(MIN_PAGE_SIZE - 1), None),
            Err(UseCaseError::InvalidRequest(_))
        ));

        let first = PageRequest::from_parts(Some(10), Some("")).unwrap();
        assert_eq!(first.from, None);
        let next = PageRequest::from_parts(Some(0), Some(cursor.as_str())).unwrap();
        assert_eq!(next.page_size, 15);
        assert!(next.from.is_some());
    }

    #[test]
    fn extra_row_yields_a_cursor_at_the_last_kept_message() {
        let page = PageRequest::first(10).unwrap();

        let full = Page::cut(rows(11), &page);
        assert_eq!(full.messages.len(), 10);
        let next = full.next.unwrap();
        assert_eq!(next.last_id, full.messages[9].id);
        assert_eq!(next.page_size, 10);

        let last = Page::cut(rows(10), &page);
        assert_eq!(last.messages.len(), 10);
        assert_eq!(last.next, None);
    }
}
