//! The signed-in user's boards.

use std::sync::Arc;
use std::time::Duration;

use taskboard_proto::board::Board;
use taskboard_proto::feed::{RowFilter, Table};
use taskboard_proto::ids::BoardId;
use taskboard_proto::member::{MemberStatus, Membership};

use crate::backend::{BackendError, NO_ROWS, Persistence, Query};
use crate::error::{FetchError, MutationError};
use crate::identity::Identity;
use crate::mutation::with_timeout;

/// Why a board could not be created.
#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    /// Board title cannot be empty.
    #[error("board title cannot be empty")]
    TitleEmpty,
    /// The insert failed.
    #[error("could not create board: {0}")]
    Write(#[from] MutationError),
}

/// Fetches one board by id.
///
/// # Errors
///
/// Returns [`FetchError`] if the select fails or no such board exists
/// (code [`NO_ROWS`]).
pub async fn fetch_board<B: Persistence>(backend: &B, board_id: BoardId) -> Result<Board, FetchError> {
    let rows = backend
        .select(&Query::table(Table::Boards).eq("id", board_id))
        .await?;
    let row = rows.into_iter().next().ok_or_else(|| {
        BackendError::with_code(NO_ROWS, format!("board {board_id} not found"))
    })?;
    Ok(serde_json::from_value(row)?)
}

/// Lists, creates, and deletes boards.
pub struct BoardDirectory<B> {
    backend: Arc<B>,
    identity: Identity,
    timeout: Duration,
}

impl<B: Persistence + 'static> BoardDirectory<B> {
    /// Creates a directory for `identity`.
    pub const fn new(backend: Arc<B>, identity: Identity, timeout: Duration) -> Self {
        Self {
            backend,
            identity,
            timeout,
        }
    }

    /// Boards the user owns or has joined, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if a select fails.
    pub async fn list(&self) -> Result<Vec<Board>, FetchError> {
        let owned = Query::table(Table::Boards).eq("owner_id", self.identity.user_id);
        let mut boards = self
            .backend
            .select(&owned)
            .await?
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Board>, _>>()?;

        let joined = Query::table(Table::BoardMembers)
            .eq("user_id", self.identity.user_id)
            .eq("status", MemberStatus::Accepted);
        for row in self.backend.select(&joined).await? {
            let membership: Membership = serde_json::from_value(row)?;
            if boards.iter().any(|b| b.id == membership.board_id) {
                continue;
            }
            match fetch_board(&*self.backend, membership.board_id).await {
                Ok(board) => boards.push(board),
                // Membership outlived its board.
                Err(FetchError::Backend(e)) if e.code.as_deref() == Some(NO_ROWS) => {}
                Err(e) => return Err(e),
            }
        }

        boards.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(boards)
    }

    /// Creates a board owned by the user.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError`] for a blank title or a failed insert.
    pub async fn create(&self, title: &str) -> Result<Board, BoardError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(BoardError::TitleEmpty);
        }
        let board = Board::new(title, self.identity.user_id);
        let row = serde_json::to_value(&board).map_err(MutationError::from)?;
        with_timeout(self.timeout, self.backend.insert(Table::Boards, row)).await?;
        tracing::info!(board_id = %board.id, "board created");
        Ok(board)
    }

    /// Deletes a board the user owns. Every open session on it shuts down
    /// when the delete is broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::RowMissing`] if no owned board matched.
    pub async fn delete(&self, board_id: BoardId) -> Result<(), MutationError> {
        let filters = [
            RowFilter::eq("id", board_id),
            RowFilter::eq("owner_id", self.identity.user_id),
        ];
        let deleted = with_timeout(self.timeout, self.backend.delete(Table::Boards, &filters)).await?;
        if deleted.is_empty() {
            return Err(MutationError::RowMissing);
        }
        tracing::info!(%board_id, "board deleted");
        Ok(())
    }
}
