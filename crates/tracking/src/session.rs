//! 访客会话

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct Session {
    start: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// 按指纹记录会话开始时间，超过 `max_age` 无访问则开始新会话
pub struct SessionCache {
    max_age: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// 返回当前会话的开始时间
    pub fn session(&self, fingerprint: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut sessions = self.sessions.lock();

        match sessions.get_mut(fingerprint) {
            Some(session) if now - session.last_seen <= self.max_age => {
                session.last_seen = now;
                session.start
            }
            _ => {
                sessions.insert(
                    fingerprint.to_string(),
                    Session {
                        start: now,
                        last_seen: now,
                    },
                );
                now
            }
        }
    }

    /// 清理过期会话，返回清理数量
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| now - s.last_seen <= self.max_age);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
