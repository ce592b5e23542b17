//! 検索セッション
//!
//! 実行中のストリームは常に1本。新しい検索は前のストリームを中断し、
//! 世代番号を進める。中断済みストリームのフレームは [`SearchSession::is_current`] で弾く。

use crate::types::{ChatRole, ChatTurn};
use futures::future::{AbortHandle, AbortRegistration};

/// 1回の検索ごとに作り直すフラグ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchFlags {
    /// Intro ページに本文を挿入済み
    pub content_inserted: bool,
    pub map_received: bool,
    pub stream_finished: bool,
}

/// 検索の識別子（世代番号）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTicket {
    generation: u64,
    query: String,
}

impl SearchTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

#[derive(Debug, Default)]
pub struct SearchSession {
    generation: u64,
    abort: Option<AbortHandle>,
    history: Vec<ChatTurn>,
    conversation_mode: bool,
    flags: SearchFlags,
    last_query: Option<String>,
}

impl SearchSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存済みの会話履歴から再開
    pub fn with_history(history: Vec<ChatTurn>) -> Self {
        Self {
            history,
            ..Self::default()
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn flags(&self) -> SearchFlags {
        self.flags
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn conversation_mode(&self) -> bool {
        self.conversation_mode
    }

    pub fn set_conversation_mode(&mut self, on: bool) {
        if self.conversation_mode != on {
            log::debug!("会話モード: {}", on);
        }
        self.conversation_mode = on;
    }

    pub fn is_in_flight(&self) -> bool {
        self.abort.is_some() && !self.flags.stream_finished
    }

    /// 新しい検索を開始
    ///
    /// 前のストリームを中断し、会話モードでなければ履歴を作り直す。
    /// 返した `AbortRegistration` で新しいストリームを `Abortable` に包むこと。
    pub fn begin(&mut self, query: &str) -> (SearchTicket, AbortRegistration) {
        self.abort();
        self.generation += 1;

        if !self.conversation_mode {
            self.history.clear();
        }
        let query = query.trim().to_string();
        self.history.push(ChatTurn::user(query.clone()));
        self.last_query = Some(query.clone());
        self.flags = SearchFlags::default();

        let (handle, registration) = AbortHandle::new_pair();
        self.abort = Some(handle);
        log::info!("検索開始 #{}: {}", self.generation, query);

        (
            SearchTicket {
                generation: self.generation,
                query,
            },
            registration,
        )
    }

    pub fn is_current(&self, ticket: &SearchTicket) -> bool {
        ticket.generation == self.generation
    }

    /// 実行中のストリームを黙って中断
    pub fn abort(&mut self) -> bool {
        match self.abort.take() {
            Some(handle) => {
                handle.abort();
                log::debug!("検索 #{} を中断", self.generation);
                true
            }
            None => false,
        }
    }

    /// 本文挿入の権利を取る（検索ごとに1回だけ `true`）
    pub fn claim_content_insertion(&mut self, ticket: &SearchTicket) -> bool {
        if !self.is_current(ticket) || self.flags.content_inserted {
            return false;
        }
        self.flags.content_inserted = true;
        true
    }

    pub fn mark_map_received(&mut self, ticket: &SearchTicket) {
        if self.is_current(ticket) {
            self.flags.map_received = true;
        }
    }

    pub fn mark_finished(&mut self, ticket: &SearchTicket) {
        if self.is_current(ticket) {
            self.flags.stream_finished = true;
            self.abort = None;
        }
    }

    pub fn push_model_turn(&mut self, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            self.history.push(ChatTurn::model(text));
        }
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// 再送用の直近のユーザー問い合わせ
    pub fn last_user_query(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|t| t.role == ChatRole::User)
            .map(ChatTurn::text)
            .or(self.last_query.as_deref())
            .filter(|q| !q.trim().is_empty())
    }

    /// 明示的なセッションリセット
    pub fn reset(&mut self) {
        self.abort();
        self.generation += 1;
        self.history.clear();
        self.conversation_mode = false;
        self.flags = SearchFlags::default();
        self.last_query = None;
    }
}
