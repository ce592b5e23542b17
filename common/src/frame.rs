//! NDJSONストリームのフレームデコーダ
//!
//! 受信チャンクを蓄積し、改行ごとに1フレームとしてJSONをデコードする。
//! - バイト列はUTF-8として逐次デコード（チャンク境界で分断された多バイト文字も保持）
//! - 行頭の `data: ` を除去、空行はスキップ
//! - 不正な行はログに残して読み飛ばす
//! - ストリーム終了後、改行のない末尾行を `finish()` で一度だけ処理

use crate::event::StreamEvent;
use futures::{pin_mut, Stream, StreamExt};
use std::ops::ControlFlow;

const DATA_PREFIX: &str = "data: ";

/// デコード統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub chunks: usize,
    pub bytes: usize,
    pub frames: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
    /// 未完了のUTF-8シーケンス
    pending: Vec<u8>,
    stats: DecoderStats,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// テキストチャンクを追加し、完成したフレームを返す
    pub fn push_str(&mut self, chunk: &str) -> Vec<StreamEvent> {
        if self.reject_after_finish() {
            return Vec::new();
        }
        self.stats.chunks += 1;
        self.stats.bytes += chunk.len();
        self.buffer.push_str(chunk);
        self.drain_lines()
    }

    /// バイトチャンクを追加し、完成したフレームを返す
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.reject_after_finish() {
            return Vec::new();
        }
        self.stats.chunks += 1;
        self.stats.bytes += chunk.len();
        self.decode_utf8(chunk);
        self.drain_lines()
    }

    /// ストリーム終了: 改行のない末尾行を処理（2回目以降は何もしない）
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;

        if !self.pending.is_empty() {
            log::warn!("ストリーム末尾に不完全なUTF-8シーケンス ({} bytes)", self.pending.len());
            let tail = String::from_utf8_lossy(&self.pending).into_owned();
            self.buffer.push_str(&tail);
            self.pending.clear();
        }

        let rest = std::mem::take(&mut self.buffer);
        self.decode_line(&rest)
    }

    fn reject_after_finish(&self) -> bool {
        if self.finished {
            log::warn!("finish() 後のチャンクを破棄");
        }
        self.finished
    }

    fn decode_utf8(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = start + e.valid_up_to();
                    self.buffer
                        .push_str(std::str::from_utf8(&self.pending[start..valid]).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            start = valid + len;
                        }
                        // 次のチャンクで完成する
                        None => {
                            start = valid;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
    }

    fn drain_lines(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(event) = self.decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn decode_line(&mut self, line: &str) -> Option<StreamEvent> {
        let trimmed = line.trim();
        let json = trimmed.strip_prefix(DATA_PREFIX).unwrap_or(trimmed).trim();
        if json.is_empty() {
            return None;
        }
        match serde_json::from_str::<StreamEvent>(json) {
            Ok(event) => {
                self.stats.frames += 1;
                Some(event)
            }
            Err(e) => {
                self.stats.failed += 1;
                log::warn!("フレームのJSON解析に失敗: {} ({})", e, truncate(json, 120));
                None
            }
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        format!("{}…", text.chars().take(max).collect::<String>())
    }
}

/// `pump()` の終了理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// ストリームが終端まで読まれた（末尾行も処理済み）
    Completed,
    /// コールバックが処理を打ち切った
    Stopped,
}

/// バイトストリームを読み切り、フレームごとにコールバックを呼ぶ
///
/// コールバックが `ControlFlow::Break` を返した時点で読み取りを止め、
/// `finish()` は呼ばない。ストリームのエラーはそのまま返す。
pub async fn pump<S, B, E, F>(
    decoder: &mut FrameDecoder,
    stream: S,
    mut on_event: F,
) -> std::result::Result<PumpOutcome, E>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    F: FnMut(StreamEvent) -> ControlFlow<()>,
{
    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for event in decoder.push_bytes(chunk.as_ref()) {
            if on_event(event).is_break() {
                log::debug!("ストリーム処理を中断");
                return Ok(PumpOutcome::Stopped);
            }
        }
    }
    if let Some(event) = decoder.finish() {
        if on_event(event).is_break() {
            return Ok(PumpOutcome::Stopped);
        }
    }
    Ok(PumpOutcome::Completed)
}
