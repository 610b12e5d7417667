// src/player/chapters.rs

use super::{CommandKind, InterpolationAnchor, PlaybackSession, PlayerError, SessionEvent, PLAYER_LOG_TARGET};
use crate::engine::models::{Chapter, PlaybackState, PlaybackStatus};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// How a reported engine file was matched to a chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterMatch {
    /// Normalized full paths are equal.
    Exact,
    /// Only the final path component matched.
    FileName,
    /// Nothing matched; the first chapter was chosen.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterDirection {
    Next,
    Previous,
}

/// Suppresses chapter re-resolution from polls around a chapter switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChapterSettle {
    /// `play_chapter` has not answered yet.
    Switching,
    /// Switch confirmed; reported files are ignored until this instant.
    Until(Instant),
}

/// Canonical form of a file path for comparison.
///
/// Separators become `/`, case is folded, a leading drive letter is
/// removed, repeated and trailing separators are collapsed.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/").to_lowercase();

    let bytes = normalized.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        normalized.drain(..2);
    }

    let mut collapsed = String::with_capacity(normalized.len());
    let mut previous_slash = false;
    for ch in normalized.chars() {
        if ch == '/' {
            if !previous_slash {
                collapsed.push(ch);
            }
            previous_slash = true;
        } else {
            collapsed.push(ch);
            previous_slash = false;
        }
    }

    if collapsed.len() > 1 && collapsed.ends_with('/') {
        collapsed.pop();
    }
    collapsed
}

fn file_name(normalized: &str) -> &str {
    normalized.rsplit('/').next().unwrap_or(normalized)
}

/// Maps an engine-reported file to a chapter of the loaded book.
///
/// Returns `None` only when `chapters` is empty.
pub fn resolve_chapter<'a>(chapters: &'a [Chapter], reported: &str) -> Option<(&'a Chapter, ChapterMatch)> {
    let first = chapters.first()?;
    let target = normalize_path(reported);

    if let Some(chapter) = chapters.iter().find(|c| normalize_path(&c.file_path) == target) {
        return Some((chapter, ChapterMatch::Exact));
    }

    let target_name = file_name(&target);
    if !target_name.is_empty() {
        if let Some(chapter) = chapters
            .iter()
            .find(|c| file_name(&normalize_path(&c.file_path)) == target_name)
        {
            return Some((chapter, ChapterMatch::FileName));
        }
    }

    debug!(target: PLAYER_LOG_TARGET, reported, fallback = %first.id, "ChapterResolutionMiss: no chapter matches reported file.");
    Some((first, ChapterMatch::Fallback))
}

impl PlaybackSession {
    /// Fetches the chapter list, treating failure as "no chapters".
    pub(crate) async fn fetch_chapters(&self, audiobook_id: &str) -> Vec<Chapter> {
        match self.engine.get_chapters(audiobook_id).await {
            Ok(mut chapters) => {
                chapters.sort_by_key(|c| c.chapter_number);
                chapters
            }
            Err(e) => {
                warn!(target: PLAYER_LOG_TARGET, audiobook_id, "Failed to fetch chapters: {}", e);
                Vec::new()
            }
        }
    }

    /// Re-resolves the current chapter from a polled status.
    pub(crate) async fn sync_current_chapter(&self, status: &PlaybackStatus) {
        let Some(reported) = status.current_file.as_deref() else {
            return;
        };
        {
            let mut settle = self.chapter_settle.lock().await;
            let current = *settle;
            match current {
                Some(ChapterSettle::Switching) => {
                    debug!(target: PLAYER_LOG_TARGET, reported, "Chapter switch in flight; ignoring reported file.");
                    return;
                }
                Some(ChapterSettle::Until(until)) if Instant::now() < until => {
                    debug!(target: PLAYER_LOG_TARGET, reported, "Chapter switch settling; ignoring reported file.");
                    return;
                }
                Some(ChapterSettle::Until(_)) => *settle = None,
                None => {}
            }
        }

        let mut changed: Option<(String, u32)> = None;
        self.now_playing_tx.send_if_modified(|np| {
            let Some((chapter, _)) = resolve_chapter(&np.chapters, reported) else {
                return false;
            };
            if np.current_chapter_id.as_deref() == Some(chapter.id.as_str()) {
                return false;
            }
            changed = Some((chapter.id.clone(), chapter.chapter_number));
            np.current_chapter_id = Some(chapter.id.clone());
            true
        });

        if let Some((chapter_id, chapter_number)) = changed {
            info!(target: PLAYER_LOG_TARGET, %chapter_id, chapter_number, "Current chapter changed.");
            self.broadcast_event(SessionEvent::ChapterChanged {
                chapter_id,
                chapter_number,
            });
        }
    }

    /// Moves to the following chapter. A no-op at the last chapter.
    pub async fn skip_to_next_chapter(self: &Arc<Self>) -> Result<(), PlayerError> {
        self.skip_chapter(ChapterDirection::Next).await
    }

    /// Moves to the preceding chapter. A no-op at the first chapter.
    pub async fn skip_to_previous_chapter(self: &Arc<Self>) -> Result<(), PlayerError> {
        self.skip_chapter(ChapterDirection::Previous).await
    }

    #[instrument(skip(self))]
    async fn skip_chapter(self: &Arc<Self>, direction: ChapterDirection) -> Result<(), PlayerError> {
        self.ensure_loaded().await?;

        let result = self
            .gate
            .guarded(CommandKind::Load, || self.switch_chapter(direction))
            .await;
        result.unwrap_or_else(|| {
            debug!(target: PLAYER_LOG_TARGET, ?direction, "Chapter switch dropped; a load is in flight.");
            Ok(())
        })
    }

    async fn switch_chapter(self: &Arc<Self>, direction: ChapterDirection) -> Result<(), PlayerError> {
        let (previous_id, target) = {
            let np = self.now_playing_tx.borrow();
            let Some(index) = np.current_chapter_index() else {
                debug!(target: PLAYER_LOG_TARGET, "No current chapter; nothing to skip.");
                return Ok(());
            };
            let target_index = match direction {
                ChapterDirection::Next => index + 1,
                ChapterDirection::Previous => match index.checked_sub(1) {
                    Some(i) => i,
                    None => {
                        debug!(target: PLAYER_LOG_TARGET, "Already at the first chapter.");
                        return Ok(());
                    }
                },
            };
            let Some(target) = np.chapters.get(target_index) else {
                debug!(target: PLAYER_LOG_TARGET, "Already at the last chapter.");
                return Ok(());
            };
            (np.current_chapter_id.clone(), target.clone())
        };

        info!(target: PLAYER_LOG_TARGET, chapter_id = %target.id, chapter_number = target.chapter_number, "Switching chapter.");
        let previous_position = self.now_playing_tx.borrow().status.position;
        self.now_playing_tx.send_modify(|np| {
            np.current_chapter_id = Some(target.id.clone());
            np.status.position = 0.0;
        });
        *self.chapter_settle.lock().await = Some(ChapterSettle::Switching);

        if let Err(e) = self.engine.play_chapter(&target.id).await {
            warn!(target: PLAYER_LOG_TARGET, chapter_id = %target.id, "Chapter switch failed: {}", e);
            *self.chapter_settle.lock().await = None;
            self.now_playing_tx.send_modify(|np| {
                np.current_chapter_id = previous_id;
                np.status.position = previous_position;
            });
            return Err(PlayerError::remote("play_chapter", e));
        }

        *self.chapter_settle.lock().await =
            Some(ChapterSettle::Until(Instant::now() + self.config.chapter_settle_delay));
        {
            let mut anchor = self.anchor.lock().await;
            *anchor = InterpolationAnchor::new(0.0, Instant::now());
            self.now_playing_tx.send_modify(|np| {
                np.current_chapter_id = Some(target.id.clone());
                np.status.position = 0.0;
                np.status.state = PlaybackState::Playing;
            });
        }
        self.ensure_tracking().await;
        self.schedule_follow_up_refresh(self.config.chapter_settle_delay).await;
        self.broadcast_event(SessionEvent::ChapterChanged {
            chapter_id: target.id.clone(),
            chapter_number: target.chapter_number,
        });
        Ok(())
    }
}
