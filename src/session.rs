use crate::card::SlotCodes;
use std::collections::HashMap;
use time::OffsetDateTime;

/// Разблокированная карта. Живёт только в памяти процесса.
#[derive(Debug)]
pub struct SessionEntry {
    pub card_id: String,
    pub codes: SlotCodes,
    pub expires_at: OffsetDateTime,
    pub activated_at: OffsetDateTime,
}

impl SessionEntry {
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at
    }
}

/// Таблица card id -> сессия. Не сериализуется; истечение проверяется лениво при чтении.
#[derive(Debug, Default)]
pub struct SessionCache {
    entries: HashMap<String, SessionEntry>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Вставить или заменить сессию карты.
    pub fn put(
        &mut self,
        card_id: &str,
        codes: SlotCodes,
        expires_at: OffsetDateTime,
        activated_at: OffsetDateTime,
    ) {
        self.entries.insert(
            card_id.to_string(),
            SessionEntry {
                card_id: card_id.to_string(),
                codes,
                expires_at,
                activated_at,
            },
        );
    }

    pub fn get(&self, card_id: &str) -> Option<&SessionEntry> {
        self.entries.get(card_id)
    }

    /// Активная сессия карты, просроченная считается отсутствующей.
    pub fn active(&self, card_id: &str, now: OffsetDateTime) -> Option<&SessionEntry> {
        self.entries.get(card_id).filter(|e| e.is_active(now))
    }

    pub fn is_active(&self, card_id: &str, now: OffsetDateTime) -> bool {
        self.active(card_id, now).is_some()
    }

    pub fn remove(&mut self, card_id: &str) -> bool {
        self.entries.remove(card_id).is_some()
    }

    /// Любая активная сессия: берём последнюю разблокированную,
    /// при равном времени побеждает больший card id.
    pub fn any_active(&self, now: OffsetDateTime) -> Option<&str> {
        self.entries
            .values()
            .filter(|e| e.is_active(now))
            .max_by(|a, b| {
                a.activated_at
                    .cmp(&b.activated_at)
                    .then_with(|| a.card_id.cmp(&b.card_id))
            })
            .map(|e| e.card_id.as_str())
    }

    pub fn purge_expired(&mut self, now: OffsetDateTime) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_active(now));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
