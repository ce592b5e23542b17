//! 時刻注入型のデバウンサ
//!
//! 連続した `trigger` を、最後の呼び出しから `delay_ms` 経過後の1回にまとめる。
//! タイマー自体は持たない（ブラウザでは `gloo::timers`、CLIでは tokio が `due_at` を見る）。

#[derive(Debug, Clone)]
pub struct Debouncer {
    delay_ms: u64,
    due_at: Option<u64>,
    coalesced: u32,
}

impl Debouncer {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            due_at: None,
            coalesced: 0,
        }
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    pub fn due_at(&self) -> Option<u64> {
        self.due_at
    }

    pub fn is_armed(&self) -> bool {
        self.due_at.is_some()
    }

    /// 発火予定を `now + delay` に延ばす
    pub fn trigger(&mut self, now: u64) {
        self.due_at = Some(now + self.delay_ms);
        self.coalesced += 1;
    }

    /// 期限に達していれば発火し、まとめた回数を返す
    pub fn poll(&mut self, now: u64) -> Option<u32> {
        match self.due_at {
            Some(due) if now >= due => {
                self.due_at = None;
                Some(std::mem::take(&mut self.coalesced))
            }
            _ => None,
        }
    }

    pub fn cancel(&mut self) {
        self.due_at = None;
        self.coalesced = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_is_coalesced() {
        let mut d = Debouncer::new(100);
        d.trigger(0);
        d.trigger(50);
        d.trigger(90);
        assert_eq!(d.poll(150), None);
        assert_eq!(d.poll(190), Some(3));
        assert_eq!(d.poll(500), None);
    }

    #[test]
    fn test_cancel() {
        let mut d = Debouncer::new(10);
        d.trigger(0);
        d.cancel();
        assert!(!d.is_armed());
        assert_eq!(d.poll(100), None);
    }
}
